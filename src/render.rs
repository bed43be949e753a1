//! Presentation of reports as text tables, JSON and CSV.

use anyhow::Result;
use serde::Serialize;

use std::{
    fmt::{self, Display},
    io::Write,
};

use crate::{
    analyze::{AppChange, Comparison, TrendReport},
    apps::App,
    model::{SalesReport, TrendAnalysis},
    money::format_amounts,
};

const TOTAL: &str = "Total";

/// Column width in characters, which is what `{:width$}` pads by.
fn name_width<'a>(names: impl Iterator<Item = &'a str>) -> usize {
    names
        .map(|name| name.chars().count())
        .max()
        .unwrap_or(0)
        .max(TOTAL.len())
}

fn percent(value: f64) -> String {
    format!("{value:+.1}%")
}

impl Display for SalesReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} sales for {} (vendor {})",
            self.period,
            self.period.format_date(self.date),
            self.vendor_id
        )?;
        if self.apps.is_empty() {
            return writeln!(f, "No sales");
        }

        let width = name_width(self.apps.iter().map(|a| a.app_name.as_str()));
        for app in &self.apps {
            writeln!(
                f,
                "{:width$} {:>8}  {}",
                app.app_name,
                app.summary.total_units,
                format_amounts(&app.summary.total_proceeds)
            )?;
        }
        writeln!(f, "{:-<length$}", "", length = width + 10)?;
        writeln!(
            f,
            "{TOTAL:width$} {:>8}  {}",
            self.summary.total_units,
            format_amounts(&self.summary.total_proceeds)
        )?;
        writeln!(
            f,
            "{} apps, {} countries",
            self.summary.total_apps, self.summary.total_countries
        )?;

        if !self.summary.top_countries.is_empty() {
            writeln!(f, "\nTop countries")?;
            for country in &self.summary.top_countries {
                writeln!(
                    f,
                    "{} {:20} {:>8}",
                    country.country, country.country_name, country.units
                )?;
            }
        }
        if let Some(trends) = &self.summary.trends {
            write!(f, "\n{trends}")?;
        }
        Ok(())
    }
}

impl Display for TrendAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Units    {} {}",
            self.units_trend.icon(),
            percent(self.units_change)
        )?;
        if let Some(currency) = &self.proceeds_currency {
            writeln!(
                f,
                "Proceeds {} {} ({currency})",
                self.proceeds_trend.icon(),
                percent(self.proceeds_change)
            )?;
        }
        if !self.new_countries.is_empty() {
            writeln!(f, "New countries: {}", self.new_countries.join(", "))?;
        }
        if !self.lost_countries.is_empty() {
            writeln!(f, "Lost countries: {}", self.lost_countries.join(", "))?;
        }
        if let Some(best) = &self.best_performer {
            writeln!(f, "Best performer: {} ({:+})", best.app_name, best.change)?;
        }
        if let Some(worst) = &self.worst_performer {
            writeln!(f, "Worst performer: {} ({:+})", worst.app_name, worst.change)?;
        }
        Ok(())
    }
}

fn write_changes(f: &mut fmt::Formatter<'_>, title: &str, changes: &[AppChange]) -> fmt::Result {
    if changes.is_empty() {
        return Ok(());
    }
    writeln!(f, "\n{title}")?;
    let width = name_width(changes.iter().map(|c| c.app_name.as_str()));
    for change in changes {
        writeln!(
            f,
            "{:width$} {:>+8} {:>8}",
            change.app_name,
            change.units_change,
            percent(change.units_percent)
        )?;
    }
    Ok(())
}

impl Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        writeln!(
            f,
            "{} compared with {}",
            date(self.current_date),
            date(self.previous_date)
        )?;
        writeln!(
            f,
            "Units {} -> {} ({})",
            self.previous_units,
            self.current_units,
            percent(self.units_change)
        )?;
        for (currency, change) in &self.proceeds_change {
            writeln!(f, "Proceeds {currency} {}", percent(*change))?;
        }
        if !self.new_currencies.is_empty() {
            writeln!(f, "New currencies: {}", self.new_currencies.join(", "))?;
        }
        if !self.new_apps.is_empty() {
            writeln!(f, "New apps: {}", self.new_apps.join(", "))?;
        }
        if !self.removed_apps.is_empty() {
            writeln!(f, "Removed apps: {}", self.removed_apps.join(", "))?;
        }
        write_changes(f, "Top gainers", &self.top_gainers)?;
        write_changes(f, "Top losers", &self.top_losers)
    }
}

impl Display for TrendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} trends over {} periods", self.frequency, self.periods.len())?;
        for (i, date) in self.periods.iter().enumerate() {
            let proceeds: Vec<_> = self
                .total_proceeds
                .iter()
                .map(|(currency, values)| (currency, &values[i]))
                .collect();
            writeln!(
                f,
                "{} {:>8}  {}",
                self.frequency.format_date(*date),
                self.total_units[i],
                format_amounts(proceeds)
            )?;
        }

        if !self.app_trends.is_empty() {
            writeln!(f, "\nApps")?;
            let width = name_width(self.app_trends.values().map(|a| a.app_name.as_str()));
            for app in self.app_trends.values() {
                writeln!(
                    f,
                    "{:width$} growth {:>8} stability {:>6.1}",
                    app.app_name,
                    percent(app.growth),
                    app.stability
                )?;
            }
        }
        if !self.insights.is_empty() {
            writeln!(f, "\nInsights")?;
            for insight in &self.insights {
                writeln!(f, "[{:?}] {}: {}", insight.severity, insight.title, insight.description)?;
            }
        }
        Ok(())
    }
}

/// Writes `value` as pretty-printed JSON.
///
/// # Errors
///
/// Returns any error from serializing or writing.
pub fn write_json(value: &impl Serialize, mut w: impl Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut w, value)?;
    writeln!(w)?;
    Ok(())
}

const REPORT_COLUMNS: [&str; 7] = [
    "App ID",
    "App Name",
    "SKU",
    "Units",
    "Countries",
    "Currency",
    "Proceeds",
];

/// Writes one CSV row per app and proceeds currency.
///
/// Apps with no proceeds get a single row with empty currency.
///
/// # Errors
///
/// Returns any error from writing.
pub fn write_report_csv(report: &SalesReport, w: impl Write) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(REPORT_COLUMNS)?;
    for app in &report.apps {
        let units = app.summary.total_units.to_string();
        let countries = app.summary.countries.to_string();
        let mut proceeds: Vec<_> = app
            .summary
            .total_proceeds
            .iter()
            .map(|(currency, amount)| (currency.as_str(), format!("{amount:.2}")))
            .collect();
        if proceeds.is_empty() {
            proceeds.push(("", String::new()));
        }
        for (currency, amount) in proceeds {
            wtr.write_record([
                app.app_id.as_str(),
                app.app_name.as_str(),
                app.sku.as_str(),
                units.as_str(),
                countries.as_str(),
                currency,
                amount.as_str(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

const COMPARISON_COLUMNS: [&str; 4] = ["App ID", "App Name", "Units Change", "Units Percent"];

/// Writes the top gainers followed by the top losers as CSV.
///
/// # Errors
///
/// Returns any error from writing.
pub fn write_comparison_csv(comparison: &Comparison, w: impl Write) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(COMPARISON_COLUMNS)?;
    for change in comparison.top_gainers.iter().chain(&comparison.top_losers) {
        wtr.write_record([
            change.app_id.clone(),
            change.app_name.clone(),
            change.units_change.to_string(),
            format!("{:.1}", change.units_percent),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes one CSV row per period: date, units, then one column per currency.
///
/// # Errors
///
/// Returns any error from writing.
pub fn write_trends_csv(trend: &TrendReport, w: impl Write) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    let mut header = vec!["Period".to_string(), "Units".to_string()];
    header.extend(trend.total_proceeds.keys().cloned());
    wtr.write_record(&header)?;
    for (i, date) in trend.periods.iter().enumerate() {
        let mut row = vec![
            trend.frequency.format_date(*date),
            trend.total_units[i].to_string(),
        ];
        row.extend(trend.total_proceeds.values().map(|v| format!("{:.2}", v[i])));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

const APP_COLUMNS: [&str; 5] = ["ID", "Name", "Bundle ID", "SKU", "Primary Locale"];

/// Writes `apps` as an aligned text table.
///
/// # Errors
///
/// Returns any error from writing.
pub fn write_apps_table(apps: &[App], mut w: impl Write) -> Result<()> {
    if apps.is_empty() {
        writeln!(w, "No apps")?;
        return Ok(());
    }
    let id = column_width(apps, APP_COLUMNS[0], |a| &a.id);
    let name = column_width(apps, APP_COLUMNS[1], |a| &a.attributes.name);
    let bundle = column_width(apps, APP_COLUMNS[2], |a| &a.attributes.bundle_id);
    let sku = column_width(apps, APP_COLUMNS[3], |a| &a.attributes.sku);
    let [c0, c1, c2, c3, c4] = APP_COLUMNS;
    writeln!(w, "{c0:id$}  {c1:name$}  {c2:bundle$}  {c3:sku$}  {c4}")?;
    for app in apps {
        let a = &app.attributes;
        writeln!(
            w,
            "{:id$}  {:name$}  {:bundle$}  {:sku$}  {}",
            app.id, a.name, a.bundle_id, a.sku, a.primary_locale
        )?;
    }
    Ok(())
}

fn column_width(apps: &[App], header: &str, field: impl Fn(&App) -> &String) -> usize {
    apps.iter()
        .map(|app| field(app).chars().count())
        .chain([header.len()])
        .max()
        .unwrap_or(0)
}

/// Writes one CSV row per app.
///
/// # Errors
///
/// Returns any error from writing.
pub fn write_apps_csv(apps: &[App], w: impl Write) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(APP_COLUMNS)?;
    for app in apps {
        let a = &app.attributes;
        wtr.write_record([&app.id, &a.name, &a.bundle_id, &a.sku, &a.primary_locale])?;
    }
    wtr.flush()?;
    Ok(())
}
