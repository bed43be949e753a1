use chrono::{NaiveDate, Utc};

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    model::{
        country_name, AmountsByCurrency, AppRanking, AppSales, AppSummary, CountrySales,
        ReportSummary, Sale, SalesRecord, SalesReport,
    },
    money::Money,
    options::Period,
    parser::parse_sale_date,
};

/// How many countries and apps the summaries rank.
pub const TOP_N: usize = 5;

/// Builds an aggregated report from parsed records.
///
/// Records are grouped by Apple Identifier; records without one are ignored.
/// Apps are ordered by total units, best seller first, with ties broken by
/// app identifier so the output is the same on every run.
#[must_use]
pub fn build_report(
    records: &[SalesRecord],
    period: Period,
    date: NaiveDate,
    vendor_id: &str,
) -> SalesReport {
    let mut groups: BTreeMap<&str, Vec<&SalesRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| !r.apple_id.is_empty()) {
        groups.entry(record.apple_id.as_str()).or_default().push(record);
    }

    let mut apps: Vec<AppSales> = groups
        .into_iter()
        .map(|(app_id, records)| app_sales(app_id, &records))
        .collect();
    apps.sort_by(|a, b| {
        b.summary
            .total_units
            .cmp(&a.summary.total_units)
            .then_with(|| a.app_id.cmp(&b.app_id))
    });

    let summary = report_summary(period, &apps);
    SalesReport {
        period,
        date,
        vendor_id: vendor_id.to_string(),
        apps,
        summary,
        generated_at: Utc::now(),
    }
}

fn sale(record: &SalesRecord) -> Sale {
    Sale {
        date: parse_sale_date(&record.begin_date),
        country: record.country_code.clone(),
        units: record.units,
        customer_price: Money::new(record.customer_price, record.customer_currency.clone()),
        developer_proceeds: Money::new(
            record.developer_proceeds,
            record.currency_of_proceeds.clone(),
        ),
        product_type: record.product_type_id.clone(),
        platform: record.supported_platforms.clone(),
        device: record.device.clone(),
        promo_code: record.promo_code.clone(),
        parent_id: record.parent_id.clone(),
        category: record.category.clone(),
    }
}

/// Aggregates the records of a single app.
fn app_sales(app_id: &str, records: &[&SalesRecord]) -> AppSales {
    let (app_name, sku) = records
        .first()
        .map(|r| (r.title.clone(), r.sku.clone()))
        .unwrap_or_default();
    let sales: Vec<Sale> = records.iter().map(|r| sale(r)).collect();

    let mut summary = AppSummary::default();
    let mut price_sum = AmountsByCurrency::new();
    let mut price_units: BTreeMap<String, i64> = BTreeMap::new();

    for sale in &sales {
        summary.total_units += sale.units;
        add_proceeds(&mut summary.total_proceeds, &sale.developer_proceeds);

        let price = &sale.customer_price;
        if price.amount > 0.0 && !price.currency.is_empty() && sale.units > 0 {
            *price_sum.entry(price.currency.clone()).or_default() += (price * sale.units).amount;
            *price_units.entry(price.currency.clone()).or_default() += sale.units;
        }

        if !sale.platform.is_empty() {
            *summary.platform_split.entry(sale.platform.clone()).or_default() += sale.units;
        }
        if !sale.device.is_empty() {
            *summary.device_split.entry(sale.device.clone()).or_default() += sale.units;
        }
    }

    summary.avg_price = price_sum
        .into_iter()
        .filter_map(|(currency, sum)| {
            let units = *price_units.get(&currency)?;
            (units > 0).then(|| (currency, sum / units as f64))
        })
        .collect();

    let countries = by_country(sales.iter());
    summary.countries = countries.len();
    summary.top_countries = top_countries(countries);

    AppSales {
        app_id: app_id.to_string(),
        app_name,
        sku,
        sales,
        summary,
    }
}

fn add_proceeds(totals: &mut AmountsByCurrency, proceeds: &Money) {
    if !proceeds.currency.is_empty() {
        *totals.entry(proceeds.currency.clone()).or_default() += proceeds.amount;
    }
}

/// Sums units and proceeds per country code.
///
/// Sales without a country code cannot be attributed to a storefront and
/// are left out.
pub fn by_country<'a>(sales: impl Iterator<Item = &'a Sale>) -> BTreeMap<String, CountrySales> {
    let mut countries: BTreeMap<String, CountrySales> = BTreeMap::new();
    for sale in sales.filter(|s| !s.country.is_empty()) {
        let country = countries
            .entry(sale.country.clone())
            .or_insert_with(|| CountrySales {
                country: sale.country.clone(),
                country_name: country_name(&sale.country),
                ..CountrySales::default()
            });
        country.units += sale.units;
        add_proceeds(&mut country.proceeds, &sale.developer_proceeds);
    }
    countries
}

/// Returns the [`TOP_N`] countries by units, ties broken by country code.
fn top_countries(countries: BTreeMap<String, CountrySales>) -> Vec<CountrySales> {
    let mut ranked: Vec<_> = countries.into_values().collect();
    // The map yields countries in code order and the sort is stable.
    ranked.sort_by(|a, b| b.units.cmp(&a.units));
    ranked.truncate(TOP_N);
    ranked
}

fn report_summary(period: Period, apps: &[AppSales]) -> ReportSummary {
    let mut summary = ReportSummary {
        total_apps: apps.len(),
        period: period.to_string(),
        ..ReportSummary::default()
    };
    for app in apps {
        summary.total_units += app.summary.total_units;
        for (currency, amount) in &app.summary.total_proceeds {
            *summary.total_proceeds.entry(currency.clone()).or_default() += amount;
        }
    }

    let all_sales = || apps.iter().flat_map(|a| a.sales.iter());
    summary.total_countries = all_sales()
        .filter(|s| !s.country.is_empty())
        .map(|s| s.country.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    summary.top_countries = top_countries(by_country(all_sales()));
    summary.top_apps = apps
        .iter()
        .take(TOP_N)
        .enumerate()
        .map(|(i, app)| AppRanking {
            app_id: app.app_id.clone(),
            app_name: app.app_name.clone(),
            units: app.summary.total_units,
            proceeds: app.summary.total_proceeds.clone(),
            rank: i + 1,
            change: 0,
        })
        .collect();
    summary
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::parser::parse;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn record(app: &str, country: &str, units: i64, proceeds: f64, currency: &str) -> SalesRecord {
        SalesRecord {
            apple_id: app.to_string(),
            title: format!("App {app}"),
            country_code: country.to_string(),
            units,
            developer_proceeds: proceeds,
            currency_of_proceeds: currency.to_string(),
            ..SalesRecord::default()
        }
    }

    fn full_report() -> SalesReport {
        let data = fs::read("testdata/sales_full.tsv").unwrap();
        build_report(&parse(&data).unwrap().records, Period::Daily, date(), "8500")
    }

    #[test]
    fn build_report_fn_aggregates_weather_pro_scenario() {
        let data = "Title\tUnits\tDeveloper Proceeds\tApple Identifier\tCountry Code\tCurrency of Proceeds\n\
                    Weather Pro\t10\t6.99\t12345\tUS\tUSD\n\
                    Weather Pro\t5\t3.49\t12345\tCA\tUSD\n";
        let records = parse(data.as_bytes()).unwrap().records;
        let report = build_report(&records, Period::Daily, date(), "8500");

        assert_eq!(report.apps.len(), 1);
        let app = &report.apps[0];
        assert_eq!(app.app_id, "12345");
        assert_eq!(app.app_name, "Weather Pro");
        assert_eq!(app.summary.total_units, 15);
        assert_eq!(app.summary.countries, 2);
        assert_eq!(app.summary.total_proceeds.len(), 1);
        assert!((app.summary.total_proceeds["USD"] - 10.48).abs() < 1e-9);
    }

    #[test]
    fn build_report_fn_conserves_units() {
        let records = vec![
            record("1", "US", 3, 1.0, "USD"),
            record("2", "GB", 4, 1.0, "GBP"),
            record("1", "FR", 5, 1.0, "EUR"),
            record("", "US", 100, 1.0, "USD"),
        ];
        let report = build_report(&records, Period::Daily, date(), "v");
        let app_units: i64 = report.apps.iter().map(|a| a.summary.total_units).sum();
        assert_eq!(app_units, 12);
        assert_eq!(report.summary.total_units, 12);
        for app in &report.apps {
            let sale_units: i64 = app.sales.iter().map(|s| s.units).sum();
            assert_eq!(app.summary.total_units, sale_units);
        }
    }

    #[test]
    fn build_report_fn_keeps_currencies_apart() {
        let report = full_report();
        let currencies: Vec<_> = report.summary.total_proceeds.keys().cloned().collect();
        assert_eq!(currencies, vec!["EUR", "USD"]);
        assert!((report.summary.total_proceeds["EUR"] - 3.15).abs() < 1e-9);
        // 3.49 + 3.49 - 3.49 (refund) + 6.99
        assert!((report.summary.total_proceeds["USD"] - 10.48).abs() < 1e-9);

        for currency in report.summary.total_proceeds.keys() {
            let from_apps: f64 = report
                .apps
                .iter()
                .filter_map(|a| a.summary.total_proceeds.get(currency))
                .sum();
            assert!((report.summary.total_proceeds[currency] - from_apps).abs() < 1e-9);
        }
    }

    #[test]
    fn build_report_fn_sorts_apps_by_units_then_id() {
        let records = vec![
            record("b", "US", 2, 1.0, "USD"),
            record("c", "US", 9, 1.0, "USD"),
            record("a", "US", 2, 1.0, "USD"),
        ];
        let report = build_report(&records, Period::Daily, date(), "v");
        let ids: Vec<_> = report.apps.iter().map(|a| a.app_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        let ranks: Vec<_> = report.summary.top_apps.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn build_report_fn_keeps_top_five_countries_deterministically() {
        let records: Vec<_> = ["JP", "US", "DE", "FR", "GB", "CA", "AU"]
            .iter()
            .enumerate()
            .map(|(i, c)| record("1", c, if i < 2 { 10 } else { 1 }, 1.0, "USD"))
            .collect();
        let report = build_report(&records, Period::Daily, date(), "v");
        let app = &report.apps[0];
        assert_eq!(app.summary.countries, 7);
        let top: Vec<_> = app
            .summary
            .top_countries
            .iter()
            .map(|c| c.country.as_str())
            .collect();
        assert_eq!(top, vec!["JP", "US", "AU", "CA", "DE"]);
        assert_eq!(report.summary.total_countries, 7);
    }

    #[test]
    fn build_report_fn_computes_splits_and_average_price() {
        let report = full_report();
        let fitness = report.app("23456789").unwrap();
        assert_eq!(fitness.summary.device_split["iPhone"], 2);
        assert_eq!(fitness.summary.device_split["Mac"], 6);
        assert_eq!(fitness.summary.platform_split["macOS"], 6);
        assert!((fitness.summary.avg_price["USD"] - 9.99).abs() < 1e-9);
        assert!((fitness.summary.avg_price["EUR"] - 4.49).abs() < 1e-9);

        let weather = report.app("12345678").unwrap();
        // Refund rows have a negative price and are left out of the average.
        assert!((weather.summary.avg_price["USD"] - 4.99).abs() < 1e-9);
        assert!((weather.summary.avg_price["CAD"] - 6.99).abs() < 1e-9);
        assert_eq!(weather.summary.total_units, 13);
        assert_eq!(
            weather.sales[0].date,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }

    #[test]
    fn build_report_fn_tracks_country_proceeds() {
        let report = full_report();
        let us = report
            .summary
            .top_countries
            .iter()
            .find(|c| c.country == "US")
            .unwrap();
        assert_eq!(us.units, 15);
        assert_eq!(us.country_name, "United States");
        assert!((us.proceeds["USD"] - 6.99).abs() < 1e-9);
    }

    #[test]
    fn build_report_fn_handles_no_records() {
        let report = build_report(&[], Period::Monthly, date(), "v");
        assert!(report.apps.is_empty());
        assert_eq!(report.summary.total_apps, 0);
        assert_eq!(report.summary.period, "MONTHLY");
    }
}
