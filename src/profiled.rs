//! Profiling decorator for cache strategies
//!
//! Every strategy registered with the coordinator is wrapped in a
//! [`ProfiledStrategy`], which times loads and saves and keeps the results in
//! lock-free counters.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::ConfigSource;
use crate::document::Document;
use crate::key::{InvocationSignature, TagKey};
use crate::tag::Tag;
use crate::traits::{CacheStrategy, CachedDocument, StorageUsage};

/// Call count and accumulated latency of one operation kind
#[derive(Debug, Default)]
struct LatencyCounter {
    calls: AtomicU64,
    total_nanos: AtomicU64,
}

impl LatencyCounter {
    fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    #[allow(clippy::cast_precision_loss)]
    fn average_micros(&self) -> f64 {
        let calls = self.calls();
        if calls == 0 {
            return 0.0;
        }
        self.total_nanos.load(Ordering::Relaxed) as f64 / calls as f64 / 1_000.0
    }
}

/// Per-strategy statistics
#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub name: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub avg_hit_latency_us: f64,
    pub avg_miss_latency_us: f64,
    pub avg_save_latency_us: f64,
    pub usage: StorageUsage,
}

/// A strategy wrapped with load/save timing
pub struct ProfiledStrategy {
    inner: Box<dyn CacheStrategy>,
    hits: LatencyCounter,
    misses: LatencyCounter,
    saves: LatencyCounter,
    save_failures: AtomicU64,
}

impl ProfiledStrategy {
    #[must_use]
    pub fn new(inner: Box<dyn CacheStrategy>) -> Self {
        Self {
            inner,
            hits: LatencyCounter::default(),
            misses: LatencyCounter::default(),
            saves: LatencyCounter::default(),
            save_failures: AtomicU64::new(0),
        }
    }

    /// The wrapped strategy
    #[must_use]
    pub fn inner(&self) -> &dyn CacheStrategy {
        self.inner.as_ref()
    }

    #[must_use]
    pub fn report(&self) -> StrategyReport {
        StrategyReport {
            name: self.inner.name(),
            hits: self.hits.calls(),
            misses: self.misses.calls(),
            saves: self.saves.calls(),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            avg_hit_latency_us: self.hits.average_micros(),
            avg_miss_latency_us: self.misses.average_micros(),
            avg_save_latency_us: self.saves.average_micros(),
            usage: self.inner.usage(),
        }
    }
}

impl CacheStrategy for ProfiledStrategy {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn init(&mut self, config: &dyn ConfigSource) -> Result<()> {
        self.inner.init(config)
    }

    fn minimal_cache_time(&self) -> Duration {
        self.inner.minimal_cache_time()
    }

    fn create_key(&self, signature: &InvocationSignature) -> TagKey {
        self.inner.create_key(signature)
    }

    fn load(&self, key: &TagKey) -> Option<CachedDocument> {
        let start = Instant::now();
        let result = self.inner.load(key);
        let elapsed = start.elapsed();
        if result.is_some() {
            self.hits.record(elapsed);
        } else {
            self.misses.record(elapsed);
        }
        trace!(strategy = self.inner.name(), key = %key, hit = result.is_some(), ?elapsed, "load");
        result
    }

    fn save(&self, key: &TagKey, tag: &Tag, document: &Document) -> bool {
        let start = Instant::now();
        let stored = self.inner.save(key, tag, document);
        self.saves.record(start.elapsed());
        if !stored {
            self.save_failures.fetch_add(1, Ordering::Relaxed);
        }
        stored
    }

    fn usage(&self) -> StorageUsage {
        self.inner.usage()
    }
}
