use chrono::NaiveDate;
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};

use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    model::SalesRecord,
    money::parse_amount,
};

/// Columns a report must carry; everything else is optional.
pub const REQUIRED_COLUMNS: [&str; 4] = ["Title", "Units", "Developer Proceeds", "Apple Identifier"];

const SALE_DATE_FORMATS: [&str; 3] = ["%m/%d/%Y", "%Y-%m-%d", "%d/%m/%Y"];

/// The outcome of parsing one report download.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedReport {
    /// Records in file order.
    pub records: Vec<SalesRecord>,
    /// Rows dropped because they could not be attributed or decoded.
    pub skipped_rows: usize,
}

/// Column positions for one report, resolved from its header row.
#[derive(Debug, Default)]
struct Columns {
    provider: Option<usize>,
    provider_country: Option<usize>,
    sku: Option<usize>,
    developer: Option<usize>,
    title: Option<usize>,
    version: Option<usize>,
    product_type_id: Option<usize>,
    units: Option<usize>,
    developer_proceeds: Option<usize>,
    begin_date: Option<usize>,
    end_date: Option<usize>,
    customer_currency: Option<usize>,
    country_code: Option<usize>,
    currency_of_proceeds: Option<usize>,
    apple_id: Option<usize>,
    customer_price: Option<usize>,
    promo_code: Option<usize>,
    parent_id: Option<usize>,
    subscription: Option<usize>,
    period: Option<usize>,
    category: Option<usize>,
    cmb: Option<usize>,
    device: Option<usize>,
    supported_platforms: Option<usize>,
    proceeds_reason: Option<usize>,
    preserved_pricing: Option<usize>,
    client: Option<usize>,
    order_type: Option<usize>,
}

impl Columns {
    /// Resolves column positions by exact, trimmed header name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] naming every missing required column.
    fn from_header(header: &StringRecord) -> Result<Self> {
        let index: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim_start_matches('\u{feff}').trim(), i))
            .collect();

        let missing: Vec<_> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| !index.contains_key(*name))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(Error::Parse(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let col = |name: &str| index.get(name).copied();
        Ok(Self {
            provider: col("Provider"),
            provider_country: col("Provider Country"),
            sku: col("SKU"),
            developer: col("Developer"),
            title: col("Title"),
            version: col("Version"),
            product_type_id: col("Product Type Identifier"),
            units: col("Units"),
            developer_proceeds: col("Developer Proceeds"),
            begin_date: col("Begin Date"),
            end_date: col("End Date"),
            customer_currency: col("Customer Currency"),
            country_code: col("Country Code"),
            currency_of_proceeds: col("Currency of Proceeds"),
            apple_id: col("Apple Identifier"),
            customer_price: col("Customer Price"),
            promo_code: col("Promo Code"),
            parent_id: col("Parent Identifier"),
            subscription: col("Subscription"),
            period: col("Period"),
            category: col("Category"),
            cmb: col("CMB"),
            device: col("Device"),
            supported_platforms: col("Supported Platforms"),
            proceeds_reason: col("Proceeds Reason"),
            preserved_pricing: col("Preserved Pricing"),
            client: col("Client"),
            order_type: col("Order Type"),
        })
    }

    /// Converts one row, or returns `None` if the row must be skipped.
    ///
    /// Cells that are not valid UTF-8 are decoded lossily; only Units and
    /// Apple Identifier decide whether a row is kept.
    fn record(&self, row: &ByteRecord) -> Option<SalesRecord> {
        let get = |col: Option<usize>| {
            col.and_then(|i| row.get(i))
                .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
                .unwrap_or_default()
        };

        let apple_id = get(self.apple_id);
        if apple_id.is_empty() {
            return None;
        }
        let units: i64 = match get(self.units).as_str() {
            "" => 0,
            raw => raw.parse().ok()?,
        };

        Some(SalesRecord {
            provider: get(self.provider),
            provider_country: get(self.provider_country),
            sku: get(self.sku),
            developer: get(self.developer),
            title: get(self.title),
            version: get(self.version),
            product_type_id: get(self.product_type_id),
            units,
            developer_proceeds: parse_amount(&get(self.developer_proceeds)),
            begin_date: get(self.begin_date),
            end_date: get(self.end_date),
            customer_currency: get(self.customer_currency),
            country_code: get(self.country_code),
            currency_of_proceeds: get(self.currency_of_proceeds),
            apple_id,
            customer_price: parse_amount(&get(self.customer_price)),
            promo_code: get(self.promo_code),
            parent_id: get(self.parent_id),
            subscription: get(self.subscription),
            period: get(self.period),
            category: get(self.category),
            cmb: get(self.cmb),
            device: get(self.device),
            supported_platforms: get(self.supported_platforms),
            proceeds_reason: get(self.proceeds_reason),
            preserved_pricing: get(self.preserved_pricing),
            client: get(self.client),
            order_type: get(self.order_type),
        })
    }
}

/// Parses a tab-separated sales report.
///
/// The first row names the columns. Rows are parsed independently: a row
/// with no Apple Identifier, a non-integer Units cell, or bytes the reader
/// cannot split into fields is skipped and counted in [`ParsedReport::skipped_rows`]
/// rather than failing the whole report. Unparseable prices and proceeds
/// count as zero.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the header cannot be read or lacks any of
/// [`REQUIRED_COLUMNS`].
pub fn parse(data: &[u8]) -> Result<ParsedReport> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(data);

    let header = rdr
        .headers()
        .map_err(|e| Error::Parse(format!("failed to read header: {e}")))?;
    let columns = Columns::from_header(header)?;

    let mut parsed = ParsedReport::default();
    for (i, result) in rdr.byte_records().enumerate() {
        let line = i + 2;
        let record = match result {
            Ok(row) => columns.record(&row),
            Err(e) => {
                tracing::debug!(line, error = %e, "unreadable report row");
                None
            }
        };
        match record {
            Some(record) => parsed.records.push(record),
            None => {
                tracing::debug!(line, "skipping report row");
                parsed.skipped_rows += 1;
            }
        }
    }
    if parsed.skipped_rows > 0 {
        tracing::info!(
            skipped = parsed.skipped_rows,
            kept = parsed.records.len(),
            "skipped malformed report rows"
        );
    }
    Ok(parsed)
}

/// Parses a report's Begin Date, trying US, ISO and then European layouts.
#[must_use]
pub fn parse_sale_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    SALE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const MINIMAL_HEADER: &str =
        "Title\tUnits\tDeveloper Proceeds\tApple Identifier\tCountry Code\tCurrency of Proceeds\n";

    #[test]
    fn parse_fn_reads_every_column_of_a_full_report() {
        let data = fs::read("testdata/sales_full.tsv").unwrap();
        let parsed = parse(&data).unwrap();
        assert_eq!(parsed.records.len(), 5);
        assert_eq!(parsed.skipped_rows, 0);

        let first = &parsed.records[0];
        assert_eq!(first.provider, "APPLE");
        assert_eq!(first.provider_country, "US");
        assert_eq!(first.sku, "com.example.weather");
        assert_eq!(first.developer, "Example Developer");
        assert_eq!(first.title, "Weather Pro");
        assert_eq!(first.version, "2.1");
        assert_eq!(first.product_type_id, "1F");
        assert_eq!(first.units, 10);
        assert_eq!(first.developer_proceeds, 3.49);
        assert_eq!(first.begin_date, "03/01/2024");
        assert_eq!(first.customer_currency, "USD");
        assert_eq!(first.country_code, "US");
        assert_eq!(first.currency_of_proceeds, "USD");
        assert_eq!(first.apple_id, "12345678");
        assert_eq!(first.customer_price, 4.99);
        assert_eq!(first.device, "iPhone");
        assert_eq!(first.supported_platforms, "iOS");
        assert_eq!(first.order_type, "");
    }

    #[test]
    fn parse_fn_keeps_refunds_negative() {
        let data = fs::read("testdata/sales_full.tsv").unwrap();
        let parsed = parse(&data).unwrap();
        let refund = &parsed.records[4];
        assert_eq!(refund.units, -1);
        assert_eq!(refund.developer_proceeds, -3.49);
    }

    #[test]
    fn parse_fn_accepts_decimal_commas() {
        let data = fs::read("testdata/sales_full.tsv").unwrap();
        let parsed = parse(&data).unwrap();
        let euro = &parsed.records[2];
        assert_eq!(euro.currency_of_proceeds, "EUR");
        assert_eq!(euro.developer_proceeds, 3.15);
        assert_eq!(euro.customer_price, 4.49);
    }

    #[test]
    fn parse_fn_rejects_header_without_required_columns() {
        let data = fs::read("testdata/sales_missing_columns.tsv").unwrap();
        let err = parse(&data).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Parse(_)));
        assert!(msg.contains("Units"), "{msg}");
        assert!(msg.contains("Apple Identifier"), "{msg}");
        assert!(!msg.contains("Title"), "{msg}");
    }

    #[test]
    fn parse_fn_rejects_empty_input() {
        assert!(matches!(parse(b"").unwrap_err(), Error::Parse(_)));
    }

    #[test]
    fn parse_fn_matches_header_names_case_sensitively_after_trimming() {
        let data = " Title \t Units\tDeveloper Proceeds \tApple Identifier\nA\t1\t0.70\t1\n";
        assert_eq!(parse(data.as_bytes()).unwrap().records.len(), 1);
        let data = "title\tUnits\tDeveloper Proceeds\tApple Identifier\nA\t1\t0.70\t1\n";
        assert!(parse(data.as_bytes()).is_err());
    }

    #[test]
    fn parse_fn_skips_rows_with_non_numeric_units() {
        let data = format!(
            "{MINIMAL_HEADER}Weather Pro\t10\t6.99\t12345\tUS\tUSD\n\
             Weather Pro\tabc\t1.00\t12345\tGB\tGBP\n\
             Weather Pro\t5\t3.49\t12345\tCA\tUSD\n"
        );
        let parsed = parse(data.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped_rows, 1);
        assert_eq!(parsed.records[0].country_code, "US");
        assert_eq!(parsed.records[1].country_code, "CA");
    }

    #[test]
    fn parse_fn_drops_rows_without_apple_identifier() {
        let data = format!(
            "{MINIMAL_HEADER}Orphan\t3\t1.00\t\tUS\tUSD\nKept\t1\t1.00\t9\tUS\tUSD\n"
        );
        let parsed = parse(data.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].title, "Kept");
        assert_eq!(parsed.skipped_rows, 1);
    }

    #[test]
    fn parse_fn_treats_unparseable_amounts_as_zero() {
        let data = format!("{MINIMAL_HEADER}A\t2\tfree\t1\tUS\tUSD\n");
        let parsed = parse(data.as_bytes()).unwrap();
        assert_eq!(parsed.records[0].developer_proceeds, 0.0);
        assert_eq!(parsed.records[0].units, 2);
    }

    #[test]
    fn parse_fn_tolerates_short_rows_and_stray_quotes() {
        let data = format!("{MINIMAL_HEADER}Say \"Hi\"\t1\t0.70\t7\n");
        let parsed = parse(data.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].title, "Say \"Hi\"");
        assert_eq!(parsed.records[0].country_code, "");
    }

    #[test]
    fn parse_fn_keeps_rows_with_invalid_utf8_text() {
        let mut data = MINIMAL_HEADER.as_bytes().to_vec();
        data.extend_from_slice(b"Caf\xe9 App\t7\t1.00\t42\tFR\tEUR\nGood\t3\t1.00\t43\tUS\tUSD\n");
        let parsed = parse(&data).unwrap();
        assert_eq!(parsed.skipped_rows, 0);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].apple_id, "42");
        assert_eq!(parsed.records[0].units, 7);
        assert_eq!(parsed.records[0].title, "Caf\u{fffd} App");
        assert_eq!(parsed.records[0].currency_of_proceeds, "EUR");
    }

    #[test]
    fn parse_fn_is_idempotent() {
        let data = fs::read("testdata/sales_full.tsv").unwrap();
        assert_eq!(parse(&data).unwrap(), parse(&data).unwrap());
    }

    #[test]
    fn parse_sale_date_fn_tries_each_layout() {
        let march_first = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert_eq!(parse_sale_date("03/01/2024"), march_first);
        assert_eq!(parse_sale_date("2024-03-01"), march_first);
        assert_eq!(
            parse_sale_date("25/03/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 25)
        );
        assert_eq!(parse_sale_date("soon"), None);
    }
}
