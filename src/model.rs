use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use std::collections::BTreeMap;

use crate::{money::Money, options::Period};

/// Amounts keyed by ISO currency code.
pub type AmountsByCurrency = BTreeMap<String, f64>;

/// One row of a sales report, as found in the tab-separated download.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SalesRecord {
    pub provider: String,
    pub provider_country: String,
    pub sku: String,
    pub developer: String,
    pub title: String,
    pub version: String,
    pub product_type_id: String,
    pub units: i64,
    pub developer_proceeds: f64,
    pub begin_date: String,
    pub end_date: String,
    pub customer_currency: String,
    pub country_code: String,
    pub currency_of_proceeds: String,
    pub apple_id: String,
    pub customer_price: f64,
    pub promo_code: String,
    pub parent_id: String,
    pub subscription: String,
    pub period: String,
    pub category: String,
    pub cmb: String,
    pub device: String,
    pub supported_platforms: String,
    pub proceeds_reason: String,
    pub preserved_pricing: String,
    pub client: String,
    pub order_type: String,
}

/// A single transaction line attributed to an app.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Sale {
    pub date: Option<NaiveDate>,
    pub country: String,
    pub units: i64,
    pub customer_price: Money,
    pub developer_proceeds: Money,
    pub product_type: String,
    pub platform: String,
    pub device: String,
    pub promo_code: String,
    pub parent_id: String,
    pub category: String,
}

/// Units and proceeds for one storefront.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CountrySales {
    pub country: String,
    pub country_name: String,
    pub units: i64,
    pub proceeds: AmountsByCurrency,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppSummary {
    pub total_units: i64,
    pub total_proceeds: AmountsByCurrency,
    /// Number of distinct countries the app sold in.
    pub countries: usize,
    /// Units-weighted average customer price, by customer currency.
    pub avg_price: AmountsByCurrency,
    pub top_countries: Vec<CountrySales>,
    pub platform_split: BTreeMap<String, i64>,
    pub device_split: BTreeMap<String, i64>,
}

/// Sales for one app within a report.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppSales {
    pub app_id: String,
    pub app_name: String,
    pub sku: String,
    pub sales: Vec<Sale>,
    pub summary: AppSummary,
}

/// An app's position in a report.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppRanking {
    pub app_id: String,
    pub app_name: String,
    pub units: i64,
    pub proceeds: AmountsByCurrency,
    pub rank: usize,
    /// Unit change against a previous period, where one was analysed.
    pub change: i64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Down,
    #[default]
    Flat,
    Up,
}

impl TrendDirection {
    /// Percentage changes within ±5% are flat.
    #[must_use]
    pub fn from_change(percent: f64) -> Self {
        if percent > 5.0 {
            TrendDirection::Up
        } else if percent < -5.0 {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        }
    }

    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            TrendDirection::Up => "↑",
            TrendDirection::Down => "↓",
            TrendDirection::Flat => "→",
        }
    }
}

/// Movement of a report against the previous period.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub units_trend: TrendDirection,
    pub proceeds_trend: TrendDirection,
    pub units_change: f64,
    pub proceeds_change: f64,
    /// The currency `proceeds_change` was measured in.
    pub proceeds_currency: Option<String>,
    pub new_countries: Vec<String>,
    pub lost_countries: Vec<String>,
    pub best_performer: Option<AppRanking>,
    pub worst_performer: Option<AppRanking>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_apps: usize,
    pub total_units: i64,
    pub total_proceeds: AmountsByCurrency,
    pub total_countries: usize,
    pub period: String,
    pub top_apps: Vec<AppRanking>,
    pub top_countries: Vec<CountrySales>,
    pub trends: Option<TrendAnalysis>,
}

/// An aggregated sales report for one period.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SalesReport {
    pub period: Period,
    pub date: NaiveDate,
    pub vendor_id: String,
    /// Sorted by total units, best seller first.
    pub apps: Vec<AppSales>,
    pub summary: ReportSummary,
    pub generated_at: DateTime<Utc>,
}

impl SalesReport {
    /// An empty report, standing in for a period with no sales.
    #[must_use]
    pub fn empty(period: Period, date: NaiveDate, vendor_id: impl Into<String>) -> Self {
        Self {
            period,
            date,
            vendor_id: vendor_id.into(),
            apps: Vec::new(),
            summary: ReportSummary {
                period: period.to_string(),
                ..ReportSummary::default()
            },
            generated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn app(&self, app_id: &str) -> Option<&AppSales> {
        self.apps.iter().find(|a| a.app_id == app_id)
    }

    /// Returns every sale in the report, across all apps.
    pub fn sales(&self) -> impl Iterator<Item = &Sale> {
        self.apps.iter().flat_map(|a| a.sales.iter())
    }
}

/// Returns a display name for a storefront country code.
#[must_use]
pub fn country_name(code: &str) -> String {
    match code {
        "US" => "United States",
        "GB" => "United Kingdom",
        "DE" => "Germany",
        "FR" => "France",
        "JP" => "Japan",
        "CN" => "China",
        "CA" => "Canada",
        "AU" => "Australia",
        "IT" => "Italy",
        "ES" => "Spain",
        "KR" => "South Korea",
        "SG" => "Singapore",
        "NL" => "Netherlands",
        "SE" => "Sweden",
        "BR" => "Brazil",
        "MX" => "Mexico",
        "IN" => "India",
        "CH" => "Switzerland",
        other => other,
    }
    .to_string()
}
