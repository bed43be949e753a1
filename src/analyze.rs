//! Period-over-period comparison and multi-period trend analysis.
//!
//! Everything here reads aggregated [`SalesReport`]s and never modifies
//! them.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    aggregate::{by_country, TOP_N},
    model::{AmountsByCurrency, AppRanking, SalesReport, TrendAnalysis, TrendDirection},
    options::Period,
};

/// Stability (coefficient of variation, in percent) above which an app is
/// reported as volatile.
pub const VOLATILITY_THRESHOLD: f64 = 50.0;

/// Overall unit growth, in percent, above which a series earns a success
/// insight.
pub const STRONG_GROWTH: f64 = 50.0;

/// Overall unit change, in percent, below which a series earns a warning.
pub const DECLINE: f64 = -20.0;

/// A detailed comparison between two reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Comparison {
    pub current_date: Option<NaiveDate>,
    pub previous_date: Option<NaiveDate>,
    pub current_units: i64,
    pub previous_units: i64,
    /// Percentage change in total units; zero when the previous period sold
    /// nothing.
    pub units_change: f64,
    /// Percentage change per currency present in both periods.
    pub proceeds_change: AmountsByCurrency,
    /// Currencies earned in the current period but not the previous one.
    pub new_currencies: Vec<String>,
    pub new_apps: Vec<String>,
    pub removed_apps: Vec<String>,
    pub top_gainers: Vec<AppChange>,
    pub top_losers: Vec<AppChange>,
    pub country_changes: BTreeMap<String, CountryChange>,
}

/// The change in one app's performance between two periods.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppChange {
    pub app_id: String,
    pub app_name: String,
    pub units_change: i64,
    pub units_percent: f64,
    pub proceeds_change: AmountsByCurrency,
}

/// The change in one country's performance between two periods.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CountryChange {
    pub country: String,
    pub units_change: i64,
    pub units_percent: f64,
    pub proceeds_change: AmountsByCurrency,
}

/// Totals and per-app series across several periods, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrendReport {
    pub periods: Vec<NaiveDate>,
    pub frequency: Period,
    pub total_units: Vec<i64>,
    pub total_proceeds: BTreeMap<String, Vec<f64>>,
    pub app_trends: BTreeMap<String, AppTrend>,
    pub country_trends: BTreeMap<String, CountryTrend>,
    pub insights: Vec<Insight>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppTrend {
    pub app_id: String,
    pub app_name: String,
    pub units: Vec<i64>,
    pub proceeds: BTreeMap<String, Vec<f64>>,
    /// Compound growth rate per period, in percent.
    pub growth: f64,
    /// Coefficient of variation of units, in percent. Lower is steadier.
    pub stability: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CountryTrend {
    pub country: String,
    pub units: Vec<i64>,
    pub proceeds: BTreeMap<String, Vec<f64>>,
    pub growth: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Growth,
    Decline,
    Anomaly,
}

/// Presentation priority of an insight. It never changes the data.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Info,
    Success,
    Warning,
}

/// An automatically generated observation about a trend series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub severity: InsightSeverity,
    pub title: String,
    pub description: String,
    pub data: serde_json::Value,
}

fn percent_change(current: f64, previous: f64) -> f64 {
    (current - previous) * 100.0 / previous
}

/// Percentage change per currency present in both maps with a positive
/// previous amount.
fn proceeds_change(current: &AmountsByCurrency, previous: &AmountsByCurrency) -> AmountsByCurrency {
    current
        .iter()
        .filter_map(|(currency, &amount)| {
            let prev = *previous.get(currency)?;
            (prev > 0.0).then(|| (currency.clone(), percent_change(amount, prev)))
        })
        .collect()
}

/// Returns the change of every app found in either report, best first.
///
/// Apps only in `current` count as +100%; apps only in `previous` as -100%.
/// Ties are broken by app identifier.
fn app_changes(current: &SalesReport, previous: &SalesReport) -> Vec<AppChange> {
    let mut changes: Vec<AppChange> = current
        .apps
        .iter()
        .map(|app| {
            let mut change = AppChange {
                app_id: app.app_id.clone(),
                app_name: app.app_name.clone(),
                ..AppChange::default()
            };
            match previous.app(&app.app_id) {
                Some(prev) => {
                    change.units_change = app.summary.total_units - prev.summary.total_units;
                    if prev.summary.total_units > 0 {
                        change.units_percent = change.units_change as f64 * 100.0
                            / prev.summary.total_units as f64;
                    }
                    change.proceeds_change =
                        proceeds_change(&app.summary.total_proceeds, &prev.summary.total_proceeds);
                }
                None => {
                    change.units_change = app.summary.total_units;
                    change.units_percent = 100.0;
                }
            }
            change
        })
        .collect();

    changes.extend(
        previous
            .apps
            .iter()
            .filter(|app| current.app(&app.app_id).is_none())
            .map(|app| AppChange {
                app_id: app.app_id.clone(),
                app_name: app.app_name.clone(),
                units_change: -app.summary.total_units,
                units_percent: -100.0,
                proceeds_change: app
                    .summary
                    .total_proceeds
                    .keys()
                    .map(|currency| (currency.clone(), -100.0))
                    .collect(),
            }),
    );

    changes.sort_by(|a, b| {
        b.units_change
            .cmp(&a.units_change)
            .then_with(|| a.app_id.cmp(&b.app_id))
    });
    changes
}

fn country_changes(current: &SalesReport, previous: &SalesReport) -> BTreeMap<String, CountryChange> {
    let curr = by_country(current.sales());
    let prev = by_country(previous.sales());

    let mut changes: BTreeMap<String, CountryChange> = curr
        .iter()
        .map(|(code, data)| {
            let mut change = CountryChange {
                country: code.clone(),
                ..CountryChange::default()
            };
            match prev.get(code) {
                Some(before) => {
                    change.units_change = data.units - before.units;
                    if before.units > 0 {
                        change.units_percent =
                            change.units_change as f64 * 100.0 / before.units as f64;
                    }
                    change.proceeds_change = proceeds_change(&data.proceeds, &before.proceeds);
                }
                None => {
                    change.units_change = data.units;
                    change.units_percent = 100.0;
                }
            }
            (code.clone(), change)
        })
        .collect();

    for (code, before) in prev.iter().filter(|(code, _)| !curr.contains_key(*code)) {
        changes.insert(
            code.clone(),
            CountryChange {
                country: code.clone(),
                units_change: -before.units,
                units_percent: -100.0,
                proceeds_change: before
                    .proceeds
                    .keys()
                    .map(|currency| (currency.clone(), -100.0))
                    .collect(),
            },
        );
    }
    changes
}

/// Compares `current` against `previous`.
#[must_use]
pub fn compare(current: &SalesReport, previous: &SalesReport) -> Comparison {
    let current_units = current.summary.total_units;
    let previous_units = previous.summary.total_units;
    let units_change = if previous_units > 0 {
        percent_change(current_units as f64, previous_units as f64)
    } else {
        0.0
    };

    let new_currencies = current
        .summary
        .total_proceeds
        .keys()
        .filter(|c| !previous.summary.total_proceeds.contains_key(*c))
        .cloned()
        .collect();

    let new_apps = current
        .apps
        .iter()
        .filter(|a| previous.app(&a.app_id).is_none())
        .map(|a| a.app_id.clone())
        .collect();
    let removed_apps = previous
        .apps
        .iter()
        .filter(|a| current.app(&a.app_id).is_none())
        .map(|a| a.app_id.clone())
        .collect();

    let changes = app_changes(current, previous);
    let top_gainers = changes
        .iter()
        .take(TOP_N)
        .filter(|c| c.units_change > 0)
        .cloned()
        .collect();
    let top_losers = changes
        .iter()
        .rev()
        .take(TOP_N)
        .filter(|c| c.units_change < 0)
        .cloned()
        .collect();

    Comparison {
        current_date: Some(current.date),
        previous_date: Some(previous.date),
        current_units,
        previous_units,
        units_change,
        proceeds_change: proceeds_change(
            &current.summary.total_proceeds,
            &previous.summary.total_proceeds,
        ),
        new_currencies,
        new_apps,
        removed_apps,
        top_gainers,
        top_losers,
        country_changes: country_changes(current, previous),
    }
}

fn country_set(report: &SalesReport) -> BTreeSet<&str> {
    report
        .sales()
        .map(|s| s.country.as_str())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Classifies how `current` moved against `previous`.
///
/// Returns `None` when there is no previous report to compare with.
#[must_use]
pub fn analyze_trends(current: &SalesReport, previous: Option<&SalesReport>) -> Option<TrendAnalysis> {
    let previous = previous?;
    let mut trends = TrendAnalysis::default();

    let prev_units = previous.summary.total_units;
    if prev_units > 0 {
        trends.units_change = percent_change(current.summary.total_units as f64, prev_units as f64);
        trends.units_trend = TrendDirection::from_change(trends.units_change);
    }

    // Proceeds are measured in the currency the current period earned most in.
    let primary = current
        .summary
        .total_proceeds
        .iter()
        .filter(|(_, &amount)| amount > 0.0)
        .fold(None::<(&String, f64)>, |best, (currency, &amount)| match best {
            Some((_, top)) if top >= amount => best,
            _ => Some((currency, amount)),
        });
    if let Some((currency, amount)) = primary {
        trends.proceeds_currency = Some(currency.clone());
        if let Some(&prev) = previous.summary.total_proceeds.get(currency) {
            if prev > 0.0 {
                trends.proceeds_change = percent_change(amount, prev);
                trends.proceeds_trend = TrendDirection::from_change(trends.proceeds_change);
            }
        }
    }

    let curr_countries = country_set(current);
    let prev_countries = country_set(previous);
    trends.new_countries = curr_countries
        .difference(&prev_countries)
        .map(ToString::to_string)
        .collect();
    trends.lost_countries = prev_countries
        .difference(&curr_countries)
        .map(ToString::to_string)
        .collect();

    let changes = app_changes(current, previous);
    let ranking = |change: &AppChange| {
        let position = current.apps.iter().position(|a| a.app_id == change.app_id);
        let app = position.map(|i| &current.apps[i]);
        AppRanking {
            app_id: change.app_id.clone(),
            app_name: change.app_name.clone(),
            units: app.map(|a| a.summary.total_units).unwrap_or_default(),
            proceeds: app.map(|a| a.summary.total_proceeds.clone()).unwrap_or_default(),
            rank: position.map_or(0, |i| i + 1),
            change: change.units_change,
        }
    };
    trends.best_performer = changes.first().map(ranking);
    if changes.len() > 1 {
        trends.worst_performer = changes.last().map(ranking);
    }

    Some(trends)
}

/// Returns the compound growth rate per period, in percent, between the
/// first and last positive values of `values`.
///
/// Returns zero when fewer than two positive values exist.
#[must_use]
pub fn growth_rate(values: &[i64]) -> f64 {
    let mut positive = values.iter().enumerate().filter(|(_, &v)| v > 0);
    let Some((first_index, &first)) = positive.next() else {
        return 0.0;
    };
    let Some((last_index, &last)) = positive.last() else {
        return 0.0;
    };
    let periods = (last_index - first_index) as f64;
    ((last as f64 / first as f64).powf(1.0 / periods) - 1.0) * 100.0
}

/// Returns the coefficient of variation of the positive values of
/// `values`, in percent, using the sample standard deviation.
#[must_use]
pub fn stability(values: &[i64]) -> f64 {
    let points: Vec<f64> = values.iter().filter(|&&v| v > 0).map(|&v| v as f64).collect();
    if points.len() < 2 {
        return 0.0;
    }
    let count = points.len() as f64;
    let mean = points.iter().sum::<f64>() / count;
    let variance = points.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1.0);
    variance.sqrt() / mean * 100.0
}

fn format_percent(value: f64) -> String {
    format!("{value:+.1}%")
}

fn insights(trend: &TrendReport) -> Vec<Insight> {
    let mut insights = Vec::new();

    if let (Some(&first), Some(&last)) = (trend.total_units.first(), trend.total_units.last()) {
        if trend.total_units.len() >= 2 && first > 0 {
            let growth = percent_change(last as f64, first as f64);
            if growth > STRONG_GROWTH {
                insights.push(Insight {
                    kind: InsightKind::Growth,
                    severity: InsightSeverity::Success,
                    title: "Strong Growth".to_string(),
                    description: format!(
                        "Total units grew by {} over the analysed periods.",
                        format_percent(growth)
                    ),
                    data: json!({ "growth": growth, "from": first, "to": last }),
                });
            } else if growth < DECLINE {
                insights.push(Insight {
                    kind: InsightKind::Decline,
                    severity: InsightSeverity::Warning,
                    title: "Declining Sales".to_string(),
                    description: format!(
                        "Total units changed by {} over the analysed periods.",
                        format_percent(growth)
                    ),
                    data: json!({ "decline": growth, "from": first, "to": last }),
                });
            }
        }
    }

    for (app_id, app) in &trend.app_trends {
        if app.stability > VOLATILITY_THRESHOLD {
            insights.push(Insight {
                kind: InsightKind::Anomaly,
                severity: InsightSeverity::Info,
                title: "Volatile App Performance".to_string(),
                description: format!("{} shows high volatility in sales.", app.app_name),
                data: json!({
                    "app_id": app_id,
                    "app_name": app.app_name,
                    "volatility": app.stability,
                }),
            });
        }
    }

    insights
}

/// Builds per-period series from reports for consecutive periods.
///
/// `series` pairs each period's anchor date with its report, oldest first;
/// a period with no sales has no report and contributes zeros.
#[must_use]
pub fn analyze_trend_series(
    frequency: Period,
    series: &[(NaiveDate, Option<&SalesReport>)],
) -> TrendReport {
    let n = series.len();
    let currencies: BTreeSet<&String> = series
        .iter()
        .filter_map(|(_, report)| *report)
        .flat_map(|r| r.summary.total_proceeds.keys())
        .collect();
    let zeroed = || -> BTreeMap<String, Vec<f64>> {
        currencies.iter().map(|c| ((*c).clone(), vec![0.0; n])).collect()
    };

    let mut trend = TrendReport {
        periods: series.iter().map(|(date, _)| *date).collect(),
        frequency,
        total_units: vec![0; n],
        total_proceeds: zeroed(),
        ..TrendReport::default()
    };

    for (i, report) in series.iter().enumerate() {
        let Some(report) = report.1 else {
            continue;
        };
        trend.total_units[i] = report.summary.total_units;
        for (currency, amount) in &report.summary.total_proceeds {
            if let Some(values) = trend.total_proceeds.get_mut(currency) {
                values[i] = *amount;
            }
        }

        for app in &report.apps {
            let app_trend = trend
                .app_trends
                .entry(app.app_id.clone())
                .or_insert_with(|| AppTrend {
                    app_id: app.app_id.clone(),
                    app_name: app.app_name.clone(),
                    units: vec![0; n],
                    proceeds: zeroed(),
                    ..AppTrend::default()
                });
            app_trend.units[i] = app.summary.total_units;
            for (currency, amount) in &app.summary.total_proceeds {
                if let Some(values) = app_trend.proceeds.get_mut(currency) {
                    values[i] = *amount;
                }
            }
        }

        for (code, country) in by_country(report.sales()) {
            let country_trend = trend
                .country_trends
                .entry(code.clone())
                .or_insert_with(|| CountryTrend {
                    country: code,
                    units: vec![0; n],
                    proceeds: zeroed(),
                    ..CountryTrend::default()
                });
            country_trend.units[i] = country.units;
            for (currency, amount) in &country.proceeds {
                if let Some(values) = country_trend.proceeds.get_mut(currency) {
                    values[i] = *amount;
                }
            }
        }
    }

    for app in trend.app_trends.values_mut() {
        app.growth = growth_rate(&app.units);
        app.stability = stability(&app.units);
    }
    for country in trend.country_trends.values_mut() {
        country.growth = growth_rate(&country.units);
    }
    trend.insights = insights(&trend);
    trend
}
