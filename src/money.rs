use serde::{Deserialize, Serialize};

use std::{
    fmt::{Debug, Display},
    ops::Mul,
    str::FromStr,
};

use crate::error::{Error, Result};

/// Represents an amount of money in a specific currency.
///
/// A `Money` with an empty currency is the currency-less zero value: it can
/// be combined with an amount in any currency. Two amounts with different,
/// non-empty currencies can never be combined.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

impl Money {
    #[must_use]
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount == 0.0
    }

    /// Adds two amounts, keeping whichever currency is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CurrencyMismatch`] if both sides carry a currency and
    /// the currencies differ.
    pub fn try_add(&self, other: &Money) -> Result<Money> {
        if !self.currency.is_empty()
            && !other.currency.is_empty()
            && self.currency != other.currency
        {
            return Err(Error::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        let currency = if self.currency.is_empty() {
            other.currency.clone()
        } else {
            self.currency.clone()
        };
        Ok(Money {
            amount: self.amount + other.amount,
            currency,
        })
    }
}

impl Debug for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.currency.is_empty() {
            write!(f, "{:.2}", self.amount)
        } else {
            write!(f, "{} {:.2}", self.currency, self.amount)
        }
    }
}

impl FromStr for Money {
    type Err = Error;

    /// Parses `"USD 4.99"` or a bare `"4.99"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (currency, amount) = match s.split_once(' ') {
            Some((currency, amount)) => (currency, amount),
            None => ("", s),
        };
        let amount = amount
            .trim()
            .parse::<f64>()
            .or_else(|_| amount.trim().replacen(',', ".", 1).parse::<f64>())
            .map_err(|_| Error::InvalidOption {
                field: "amount",
                value: s.to_string(),
            })?;
        Ok(Money::new(amount, currency))
    }
}

impl Mul<i64> for &Money {
    type Output = Money;

    fn mul(self, rhs: i64) -> Self::Output {
        Money::new(self.amount * rhs as f64, self.currency.clone())
    }
}

/// Parses a report amount leniently.
///
/// Tries a period-decimal parse first, then retries with the first comma
/// replaced by a period. Anything still unparseable counts as zero.
#[must_use]
pub fn parse_amount(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    s.parse::<f64>()
        .or_else(|_| s.replacen(',', ".", 1).parse::<f64>())
        .unwrap_or(0.0)
}

/// Formats a currency map as `"EUR 1.00, USD 2.50"`.
#[must_use]
pub fn format_amounts<'a>(amounts: impl IntoIterator<Item = (&'a String, &'a f64)>) -> String {
    let parts: Vec<_> = amounts
        .into_iter()
        .map(|(currency, amount)| format!("{currency} {amount:.2}"))
        .collect();
    if parts.is_empty() {
        "No proceeds".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_add_fn_adds_amounts_in_the_same_currency() {
        let sum = Money::new(6.99, "USD").try_add(&Money::new(3.49, "USD")).unwrap();
        assert_eq!(sum.currency, "USD");
        assert!((sum.amount - 10.48).abs() < 1e-9);
    }

    #[test]
    fn try_add_fn_accepts_currency_less_zero_on_either_side() {
        let sum = Money::default().try_add(&Money::new(2.0, "EUR")).unwrap();
        assert_eq!(sum, Money::new(2.0, "EUR"));
        let sum = Money::new(2.0, "EUR").try_add(&Money::default()).unwrap();
        assert_eq!(sum, Money::new(2.0, "EUR"));
    }

    #[test]
    fn try_add_fn_rejects_mixed_currencies() {
        let err = Money::new(1.0, "USD")
            .try_add(&Money::new(1.0, "EUR"))
            .unwrap_err();
        assert!(matches!(err, Error::CurrencyMismatch { .. }));
    }

    #[test]
    fn parse_amount_fn_falls_back_to_decimal_comma() {
        assert_eq!(parse_amount("4.99"), 4.99);
        assert_eq!(parse_amount(" 4,99 "), 4.99);
        assert_eq!(parse_amount("-0.70"), -0.7);
        assert_eq!(parse_amount("n/a"), 0.0);
        assert_eq!(parse_amount(""), 0.0);
    }

    #[test]
    fn from_str_parses_currency_and_amount() {
        assert_eq!(Money::from_str("USD 4.99").unwrap(), Money::new(4.99, "USD"));
        assert_eq!(Money::from_str("3,50").unwrap(), Money::new(3.5, ""));
        assert!(Money::from_str("USD lots").is_err());
    }

    #[test]
    fn display_includes_currency_when_set() {
        assert_eq!(Money::new(4.5, "GBP").to_string(), "GBP 4.50");
        assert_eq!(Money::new(4.5, "").to_string(), "4.50");
    }

    #[test]
    fn mul_scales_amount_by_units() {
        assert_eq!(&Money::new(1.5, "USD") * 3, Money::new(4.5, "USD"));
    }
}
