//! The public entry points: single reports, comparisons and trends.

use futures::{stream, StreamExt, TryStreamExt};

use std::{sync::Arc, time::Duration};

use crate::{
    aggregate::build_report,
    analyze::{analyze_trend_series, analyze_trends, compare, Comparison, TrendReport},
    cache::{ReportCache, DEFAULT_TTL},
    error::{Error, Result},
    model::SalesReport,
    options::{ReportOptions, TrendOptions},
    parser,
    transport::Transport,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of report fetches in flight for one call.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Tuning for a [`SalesService`].
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    /// Deadline for one report fetch unless the request overrides it.
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: DEFAULT_TTL,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Fetches, aggregates, caches and analyses sales reports.
pub struct SalesService {
    transport: Transport,
    cache: Option<Arc<dyn ReportCache>>,
    config: ServiceConfig,
}

impl SalesService {
    #[must_use]
    pub fn new(
        transport: Transport,
        cache: Option<Arc<dyn ReportCache>>,
        config: ServiceConfig,
    ) -> Self {
        SalesService {
            transport,
            cache,
            config,
        }
    }

    /// Returns the aggregated report described by `options`, or `None` when
    /// the period had no sales.
    ///
    /// With `include_analysis` set, the returned report carries a
    /// [`crate::model::TrendAnalysis`] against `previous_period`, fetching the
    /// previous period first if none was supplied. The cached report is never
    /// annotated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the fetch outlives its deadline, and
    /// any error from the transport or the parser.
    pub async fn get_report(&self, options: &ReportOptions) -> Result<Option<Arc<SalesReport>>> {
        let Some(report) = self.cached_report(options).await? else {
            return Ok(None);
        };
        if !options.include_analysis {
            return Ok(Some(report));
        }

        let previous = match (&options.previous_period, options.previous()) {
            (Some(previous), _) => Some(previous.clone()),
            (None, Some(previous)) => self.cached_report(&previous).await?,
            (None, None) => None,
        };
        let mut analysed = (*report).clone();
        analysed.summary.trends = analyze_trends(&report, previous.as_deref());
        Ok(Some(Arc::new(analysed)))
    }

    /// Fetches several reports, at most `concurrency` at a time.
    ///
    /// Results are in the order of `requests`.
    ///
    /// # Errors
    ///
    /// Fails with the first error any fetch returns; fetches still in
    /// flight are cancelled.
    pub async fn get_multiple_reports(
        &self,
        requests: &[ReportOptions],
    ) -> Result<Vec<Option<Arc<SalesReport>>>> {
        tracing::debug!(count = requests.len(), "fetching reports");
        stream::iter(requests.iter().map(|options| self.get_report(options)))
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await
    }

    /// Compares two periods, fetching both concurrently.
    ///
    /// A period without sales compares as an empty report.
    ///
    /// # Errors
    ///
    /// Fails if either fetch fails.
    pub async fn get_comparison(
        &self,
        current: &ReportOptions,
        previous: &ReportOptions,
    ) -> Result<Comparison> {
        let (curr, prev) =
            futures::try_join!(self.cached_report(current), self.cached_report(previous))?;
        let curr = curr.unwrap_or_else(|| Arc::new(empty_report(current)));
        let prev = prev.unwrap_or_else(|| Arc::new(empty_report(previous)));
        Ok(compare(&curr, &prev))
    }

    /// Builds trend series over `options.periods` periods ending at
    /// `options.end_date`.
    ///
    /// # Errors
    ///
    /// Fails if any of the period fetches fails.
    pub async fn get_trends(&self, options: &TrendOptions) -> Result<TrendReport> {
        let requests = options.report_requests();
        let reports = self.get_multiple_reports(&requests).await?;
        let series: Vec<_> = requests
            .iter()
            .zip(&reports)
            .map(|(request, report)| (request.date, report.as_deref()))
            .collect();
        Ok(analyze_trend_series(options.frequency, &series))
    }

    /// Returns the unannotated report, from the cache when allowed.
    async fn cached_report(&self, options: &ReportOptions) -> Result<Option<Arc<SalesReport>>> {
        let key = options.cache_key();
        let cache = self.cache.as_ref().filter(|_| !options.no_cache);

        if let Some(report) = cache.and_then(|cache| cache.get(&key)) {
            tracing::debug!(%key, "report cache hit");
            return Ok(Some(report));
        }
        tracing::debug!(%key, "report cache miss");

        let Some(report) = self.fetch(options).await? else {
            return Ok(None);
        };
        let report = Arc::new(report);
        if let Some(cache) = cache {
            cache.set(&key, report.clone(), self.config.cache_ttl);
        }
        Ok(Some(report))
    }

    async fn fetch(&self, options: &ReportOptions) -> Result<Option<SalesReport>> {
        let deadline = options.timeout.unwrap_or(self.config.timeout);
        let request = options.request();
        let body = tokio::time::timeout(deadline, self.transport.fetch_report(&request))
            .await
            .map_err(|_| Error::Timeout(deadline))??;
        let Some(body) = body else {
            return Ok(None);
        };

        let parsed = parser::parse(&body)?;
        tracing::debug!(
            records = parsed.records.len(),
            date = %request.date,
            "parsed sales report"
        );
        Ok(Some(build_report(
            &parsed.records,
            options.period,
            options.date,
            &options.vendor_number,
        )))
    }
}

fn empty_report(options: &ReportOptions) -> SalesReport {
    SalesReport::empty(options.period, options.date, options.vendor_number.clone())
}
