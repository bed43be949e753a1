use chrono::{Datelike, Days, Months, NaiveDate};
use regex::Regex;
use serde_with::{DeserializeFromStr, SerializeDisplay};

use std::{
    fmt::Display,
    str::FromStr,
    sync::{Arc, LazyLock},
    time::Duration,
};

use crate::{
    error::{Error, Result},
    model::SalesReport,
};

static REPORT_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").expect("report date pattern compiles")
});

/// The granularity of a sales report.
#[derive(
    Clone, Copy, Debug, Default, DeserializeFromStr, Eq, Hash, Ord, PartialEq, PartialOrd, SerializeDisplay,
)]
pub enum Period {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Period {
    /// Formats `date` the way the API expects it for this period.
    #[must_use]
    pub fn format_date(self, date: NaiveDate) -> String {
        match self {
            Period::Daily | Period::Weekly => date.format("%Y-%m-%d").to_string(),
            Period::Monthly => date.format("%Y-%m").to_string(),
            Period::Yearly => date.format("%Y").to_string(),
        }
    }

    /// Returns the anchor date `steps` periods before `date`, or `None` if
    /// that falls outside the calendar.
    #[must_use]
    pub fn step_back(self, date: NaiveDate, steps: u32) -> Option<NaiveDate> {
        match self {
            Period::Daily => date.checked_sub_days(Days::new(u64::from(steps))),
            Period::Weekly => date.checked_sub_days(Days::new(7 * u64::from(steps))),
            Period::Monthly => date.checked_sub_months(Months::new(steps)),
            Period::Yearly => steps
                .checked_mul(12)
                .and_then(|months| date.checked_sub_months(Months::new(months))),
        }
    }

    /// Parses a report date written as `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    ///
    /// Daily and weekly reports need a full date; monthly reports need at
    /// least a month. Missing parts default to the first day of the month or
    /// year.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the string is not a date, or is
    /// less precise than this period requires.
    pub fn parse_date(self, s: &str) -> Result<NaiveDate> {
        let invalid = || Error::InvalidOption {
            field: "date",
            value: s.to_string(),
        };
        let caps = REPORT_DATE.captures(s.trim()).ok_or_else(invalid)?;
        let part = |i: usize| caps.get(i).map(|m| m.as_str().parse::<u32>());
        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let month = part(2).transpose().map_err(|_| invalid())?;
        let day = part(3).transpose().map_err(|_| invalid())?;
        let precise_enough = match self {
            Period::Daily | Period::Weekly => day.is_some(),
            Period::Monthly => month.is_some(),
            Period::Yearly => true,
        };
        if !precise_enough {
            return Err(invalid());
        }
        NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1)).ok_or_else(invalid)
    }

    /// The anchor date of the period immediately before the one containing
    /// `date`.
    #[must_use]
    pub fn previous(self, date: NaiveDate) -> Option<NaiveDate> {
        let date = match self {
            Period::Monthly => date.with_day(1)?,
            Period::Yearly => date.with_day(1)?.with_month(1)?,
            Period::Daily | Period::Weekly => date,
        };
        self.step_back(date, 1)
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Period::Daily => "DAILY",
            Period::Weekly => "WEEKLY",
            Period::Monthly => "MONTHLY",
            Period::Yearly => "YEARLY",
        })
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Period::Daily),
            "WEEKLY" => Ok(Period::Weekly),
            "MONTHLY" => Ok(Period::Monthly),
            "YEARLY" => Ok(Period::Yearly),
            _ => Err(Error::InvalidOption {
                field: "period",
                value: s.to_string(),
            }),
        }
    }
}

/// The kind of report to request.
#[derive(Clone, Copy, Debug, Default, DeserializeFromStr, Eq, Hash, PartialEq, SerializeDisplay)]
pub enum ReportType {
    #[default]
    Sales,
    Subscription,
    SubscriptionEvent,
}

impl ReportType {
    /// The report sub-type requested alongside this type.
    #[must_use]
    pub fn sub_type(self) -> &'static str {
        "SUMMARY"
    }
}

impl Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReportType::Sales => "SALES",
            ReportType::Subscription => "SUBSCRIPTION",
            ReportType::SubscriptionEvent => "SUBSCRIPTION_EVENT",
        })
    }
}

impl FromStr for ReportType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SALES" => Ok(ReportType::Sales),
            "SUBSCRIPTION" => Ok(ReportType::Subscription),
            "SUBSCRIPTION_EVENT" => Ok(ReportType::SubscriptionEvent),
            _ => Err(Error::InvalidOption {
                field: "report type",
                value: s.to_string(),
            }),
        }
    }
}

/// The coordinates of one report, as sent to the API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportRequest {
    pub period: Period,
    pub date: String,
    pub report_type: ReportType,
    pub vendor_number: String,
}

/// Configures a single sales report request.
#[derive(Clone, Debug, Default)]
pub struct ReportOptions {
    pub period: Period,
    pub date: NaiveDate,
    pub report_type: ReportType,
    pub vendor_number: String,
    /// Skip the cache for both lookup and store.
    pub no_cache: bool,
    /// Attach a [`crate::model::TrendAnalysis`] against `previous_period`.
    pub include_analysis: bool,
    pub previous_period: Option<Arc<SalesReport>>,
    /// Overrides the service's default deadline for this fetch.
    pub timeout: Option<Duration>,
}

impl ReportOptions {
    #[must_use]
    pub fn new(
        period: Period,
        date: NaiveDate,
        report_type: ReportType,
        vendor_number: impl Into<String>,
    ) -> Self {
        Self {
            period,
            date,
            report_type,
            vendor_number: vendor_number.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn format_date(&self) -> String {
        self.period.format_date(self.date)
    }

    /// Returns the cache key identifying this report.
    ///
    /// Period, formatted date, report type and vendor number are joined with
    /// `:`; none of the enum renderings or formatted dates contain `:`, so
    /// distinct tuples never collide unless the vendor number does.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "sales:{}:{}:{}:{}",
            self.period,
            self.format_date(),
            self.report_type,
            self.vendor_number
        )
    }

    #[must_use]
    pub fn request(&self) -> ReportRequest {
        ReportRequest {
            period: self.period,
            date: self.format_date(),
            report_type: self.report_type,
            vendor_number: self.vendor_number.clone(),
        }
    }

    /// Returns options for the same report one period earlier.
    #[must_use]
    pub fn previous(&self) -> Option<Self> {
        Some(Self {
            date: self.period.previous(self.date)?,
            include_analysis: false,
            previous_period: None,
            ..self.clone()
        })
    }
}

/// The dimension a trend report is grouped by.
///
/// Informational only: every trend report carries both app and country
/// series.
#[derive(Clone, Copy, Debug, Default, DeserializeFromStr, Eq, PartialEq, SerializeDisplay)]
pub enum GroupBy {
    #[default]
    App,
    Country,
    Platform,
}

impl Display for GroupBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GroupBy::App => "app",
            GroupBy::Country => "country",
            GroupBy::Platform => "platform",
        })
    }
}

impl FromStr for GroupBy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "app" => Ok(GroupBy::App),
            "country" => Ok(GroupBy::Country),
            "platform" => Ok(GroupBy::Platform),
            _ => Err(Error::InvalidOption {
                field: "group by",
                value: s.to_string(),
            }),
        }
    }
}

/// Configures a multi-period trend request.
#[derive(Clone, Debug, Default)]
pub struct TrendOptions {
    pub frequency: Period,
    pub end_date: NaiveDate,
    pub periods: u32,
    pub report_type: ReportType,
    pub vendor_number: String,
    pub group_by: GroupBy,
}

impl TrendOptions {
    /// Returns one request per period, oldest first, ending at `end_date`.
    #[must_use]
    pub fn report_requests(&self) -> Vec<ReportOptions> {
        (0..self.periods)
            .rev()
            .filter_map(|i| self.frequency.step_back(self.end_date, i))
            .map(|date| {
                ReportOptions::new(
                    self.frequency,
                    date,
                    self.report_type,
                    self.vendor_number.clone(),
                )
            })
            .collect()
    }
}
