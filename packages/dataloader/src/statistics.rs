//! Load and batch counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of a loader's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Keys requested through `load`
    pub load_count: u64,
    /// Loads that resolved to an error
    pub load_error_count: u64,
    /// Calls made to the batch loader
    pub batch_invoke_count: u64,
    /// Keys handed to the batch loader
    pub batch_load_count: u64,
    /// Batches whose loader failed
    pub batch_load_exception_count: u64,
    /// Loads served from the cache
    pub cache_hit_count: u64,
}

impl Statistics {
    /// Sum of two snapshots
    pub fn combine(&self, other: &Statistics) -> Statistics {
        Statistics {
            load_count: self.load_count + other.load_count,
            load_error_count: self.load_error_count + other.load_error_count,
            batch_invoke_count: self.batch_invoke_count + other.batch_invoke_count,
            batch_load_count: self.batch_load_count + other.batch_load_count,
            batch_load_exception_count: self.batch_load_exception_count
                + other.batch_load_exception_count,
            cache_hit_count: self.cache_hit_count + other.cache_hit_count,
        }
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        if self.load_count == 0 {
            return 0.0;
        }
        self.cache_hit_count as f64 / self.load_count as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatisticsCollector {
    load_count: AtomicU64,
    load_error_count: AtomicU64,
    batch_invoke_count: AtomicU64,
    batch_load_count: AtomicU64,
    batch_load_exception_count: AtomicU64,
    cache_hit_count: AtomicU64,
}

impl StatisticsCollector {
    pub fn record_load(&self) {
        self.load_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_error(&self) {
        self.load_error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, keys: usize) {
        self.batch_invoke_count.fetch_add(1, Ordering::Relaxed);
        self.batch_load_count.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub fn record_batch_failure(&self) {
        self.batch_load_exception_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Statistics {
        Statistics {
            load_count: self.load_count.load(Ordering::Relaxed),
            load_error_count: self.load_error_count.load(Ordering::Relaxed),
            batch_invoke_count: self.batch_invoke_count.load(Ordering::Relaxed),
            batch_load_count: self.batch_load_count.load(Ordering::Relaxed),
            batch_load_exception_count: self.batch_load_exception_count.load(Ordering::Relaxed),
            cache_hit_count: self.cache_hit_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_snapshot() {
        let collector = StatisticsCollector::default();
        collector.record_load();
        collector.record_load();
        collector.record_cache_hit();
        collector.record_batch(3);
        collector.record_batch_failure();
        collector.record_load_error();

        let stats = collector.snapshot();
        assert_eq!(stats.load_count, 2);
        assert_eq!(stats.cache_hit_count, 1);
        assert_eq!(stats.batch_invoke_count, 1);
        assert_eq!(stats.batch_load_count, 3);
        assert_eq!(stats.batch_load_exception_count, 1);
        assert_eq!(stats.load_error_count, 1);
        assert_eq!(stats.cache_hit_ratio(), 0.5);
    }

    #[test]
    fn test_combine() {
        let a = Statistics {
            load_count: 4,
            batch_invoke_count: 1,
            ..Default::default()
        };
        let b = Statistics {
            load_count: 2,
            cache_hit_count: 2,
            ..Default::default()
        };
        let combined = a.combine(&b);
        assert_eq!(combined.load_count, 6);
        assert_eq!(combined.batch_invoke_count, 1);
        assert_eq!(combined.cache_hit_count, 2);
        assert_eq!(Statistics::default().cache_hit_ratio(), 0.0);
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(Statistics {
            load_count: 1,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["load_count"], 1);
        assert_eq!(json["cache_hit_count"], 0);
    }
}
