//! Keyed storage for aggregated reports with per-entry expiry.

use moka::{sync::Cache, Expiry};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::model::SalesReport;

/// How long a fetched report is cached unless configured otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_CAPACITY: u64 = 1_000;

/// Storage for aggregated reports, shared between concurrent fetches.
///
/// An expired entry is never returned.
pub trait ReportCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<SalesReport>>;
    fn set(&self, key: &str, report: Arc<SalesReport>, ttl: Duration);
    fn delete(&self, key: &str);
    fn clear(&self);
}

#[derive(Clone)]
struct Entry {
    report: Arc<SalesReport>,
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// An in-process [`ReportCache`].
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl MemoryCache {
    /// Creates a cache holding at most `capacity` reports.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        MemoryCache {
            entries: Cache::builder()
                .max_capacity(capacity)
                .expire_after(EntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ReportCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<SalesReport>> {
        self.entries.get(key).map(|entry| entry.report)
    }

    fn set(&self, key: &str, report: Arc<SalesReport>, ttl: Duration) {
        self.entries.insert(key.to_string(), Entry { report, ttl });
    }

    fn delete(&self, key: &str) {
        self.entries.invalidate(key);
    }

    fn clear(&self) {
        self.entries.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Period;
    use chrono::NaiveDate;

    fn report(vendor: &str) -> Arc<SalesReport> {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        Arc::new(SalesReport::empty(Period::Daily, date, vendor))
    }

    #[test]
    fn get_fn_returns_stored_report_until_ttl_elapses() {
        let cache = MemoryCache::default();
        cache.set("k", report("a"), Duration::from_millis(50));
        assert_eq!(cache.get("k").unwrap().vendor_id, "a");

        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn set_fn_replaces_entry_and_its_ttl() {
        let cache = MemoryCache::default();
        cache.set("k", report("a"), Duration::from_millis(50));
        cache.set("k", report("b"), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get("k").unwrap().vendor_id, "b");
    }

    #[test]
    fn delete_and_clear_fns_remove_entries() {
        let cache = MemoryCache::default();
        cache.set("a", report("a"), DEFAULT_TTL);
        cache.set("b", report("b"), DEFAULT_TTL);
        cache.set("c", report("c"), DEFAULT_TTL);

        cache.delete("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear();
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_none());
    }
}
