//! Diagnostic counters for a getter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a getter's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetterStats {
    /// Calls answered from the store without fetching.
    pub hits: u64,
    /// Calls that fell through to the fetch path (absent, unreadable or
    /// malformed entry).
    pub misses: u64,
    /// Fetches actually invoked.
    pub fetches: u64,
    /// Fetches that returned an error.
    pub fetch_errors: u64,
    /// Calls that joined a fetch already running for their key.
    pub coalesced: u64,
    /// Store read, write or delete failures.
    pub store_errors: u64,
    /// Stored entries that could not be decoded.
    pub decode_errors: u64,
}

impl GetterStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    coalesced: AtomicU64,
    store_errors: AtomicU64,
    decode_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> GetterStats {
        GetterStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getter_stats_hit_rate() {
        let stats = GetterStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = GetterStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.record_hit();
        counters.record_miss();
        counters.record_miss();
        counters.record_fetch();
        counters.record_coalesced();
        counters.record_store_error();

        let stats = counters.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.store_errors, 1);
        assert_eq!(stats.fetch_errors, 0);
        assert_eq!(stats.decode_errors, 0);
    }
}
