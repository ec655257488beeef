//! Cache Coordinator - Ordered Strategy Chain
//!
//! Runs loads and saves across every registered strategy:
//! - `load` asks strategies in registration order and returns the first hit
//! - `save` asks every strategy and succeeds if any of them stored the document
//!
//! Hits in a later strategy are not copied into earlier ones.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::key::InvocationSignature;
use crate::profiled::{ProfiledStrategy, StrategyReport};
use crate::tag::Tag;
use crate::traits::{CacheStrategy, CachedDocument};

/// RAII cleanup guard for in-flight request tracking
/// Ensures that entries are removed from `DashMap` even on early return or panic
///
/// The entry is removed only while it still holds this guard's lock and no
/// other caller holds a clone of it; queued callers keep it alive.
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        // the map's reference plus ours
        self.map.remove_if(&self.key, |_, current| {
            Arc::ptr_eq(current, &self.lock) && Arc::strong_count(current) <= 2
        });
    }
}

/// Coordinator statistics
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub hit_rate: f64,
    pub in_flight_requests: usize,
    pub strategies: usize,
}

/// Coordinator statistics plus one report per strategy, in registration order
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub coordinator: CoordinatorStats,
    pub strategies: Vec<StrategyReport>,
}

/// Ordered chain of cache strategies
pub struct CacheCoordinator {
    strategies: Vec<ProfiledStrategy>,
    /// Statistics
    total_requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
    save_failures: AtomicU64,
    /// In-flight computations, one lock per composed key
    in_flight_requests: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheCoordinator {
    /// Create a coordinator with no strategies
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            total_requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            in_flight_requests: DashMap::new(),
        }
    }

    /// Append a strategy to the chain
    pub fn add_strategy(&mut self, strategy: Box<dyn CacheStrategy>) {
        info!(
            strategy = strategy.name(),
            position = self.strategies.len(),
            min_cache_time_secs = strategy.minimal_cache_time().as_secs(),
            "Registered cache strategy"
        );
        self.strategies.push(ProfiledStrategy::new(strategy));
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn CacheStrategy>) -> Self {
        self.add_strategy(strategy);
        self
    }

    #[must_use]
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Strategy names in registration order
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(CacheStrategy::name).collect()
    }

    /// Smallest minimal cache time among the strategies; zero with none
    #[must_use]
    pub fn minimal_cache_time(&self) -> Duration {
        self.strategies
            .iter()
            .map(CacheStrategy::minimal_cache_time)
            .min()
            .unwrap_or(Duration::ZERO)
    }

    /// First hit in registration order
    pub fn load(&self, signature: &InvocationSignature) -> Option<CachedDocument> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        for strategy in &self.strategies {
            let key = strategy.create_key(signature);
            if let Some(cached) = strategy.load(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(strategy = strategy.name(), key = %key, "Cache hit");
                return Some(cached);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(method = %signature.method, "Cache miss");
        None
    }

    /// Store in every strategy; true if at least one stored it
    pub fn save(&self, signature: &InvocationSignature, tag: &Tag, document: &Document) -> bool {
        let mut stored = false;
        for strategy in &self.strategies {
            let key = strategy.create_key(signature);
            if strategy.save(&key, tag, document) {
                stored = true;
            } else {
                warn!(strategy = strategy.name(), key = %key, "Cache save failed");
            }
        }

        if stored {
            self.saves.fetch_add(1, Ordering::Relaxed);
        } else {
            self.save_failures.fetch_add(1, Ordering::Relaxed);
        }
        stored
    }

    /// Run `f` while holding the in-flight lock for `signature`
    ///
    /// Concurrent callers with the same signature run one after another.
    /// `f` receives `true` when another caller held the lock first; such a
    /// caller should re-check the cache before computing.
    pub fn coalesce<R>(&self, signature: &InvocationSignature, f: impl FnOnce(bool) -> R) -> R {
        let key = signature.compose();
        let (lock, contended) = match self.in_flight_requests.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), true),
            Entry::Vacant(entry) => {
                let lock = entry.insert(Arc::new(Mutex::new(())));
                (Arc::clone(lock.value()), false)
            }
        };

        // RAII cleanup guard - ensures entry is removed even on early return or panic
        let cleanup_guard = CleanupGuard {
            map: &self.in_flight_requests,
            key,
            lock,
        };
        let _guard = cleanup_guard.lock.lock();

        f(contended)
    }

    /// Get coordinator statistics
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn get_stats(&self) -> CoordinatorStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);

        CoordinatorStats {
            total_requests,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            hit_rate: if total_requests > 0 {
                (hits as f64 / total_requests as f64) * 100.0
            } else {
                0.0
            },
            in_flight_requests: self.in_flight_requests.len(),
            strategies: self.strategies.len(),
        }
    }

    /// Coordinator statistics with every strategy's report
    #[must_use]
    pub fn report(&self) -> CacheReport {
        CacheReport {
            coordinator: self.get_stats(),
            strategies: self.strategies.iter().map(ProfiledStrategy::report).collect(),
        }
    }
}

impl Default for CacheCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryCache, MemoryCacheConfig};
    use crate::key::TagKey;
    use std::sync::Barrier;
    use std::thread;

    /// Rejects every save, never hits
    struct BrokenStrategy;

    impl CacheStrategy for BrokenStrategy {
        fn name(&self) -> &'static str {
            "Broken"
        }

        fn minimal_cache_time(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn create_key(&self, signature: &InvocationSignature) -> TagKey {
            TagKey::raw(signature)
        }

        fn load(&self, _key: &TagKey) -> Option<CachedDocument> {
            None
        }

        fn save(&self, _key: &TagKey, _tag: &Tag, _document: &Document) -> bool {
            false
        }
    }

    fn doc(text: &str) -> Document {
        Document::parse(text).unwrap()
    }

    #[test]
    fn test_empty_coordinator() {
        let coordinator = CacheCoordinator::new();
        let sig = InvocationSignature::new("page");
        assert_eq!(coordinator.minimal_cache_time(), Duration::ZERO);
        assert!(coordinator.load(&sig).is_none());
        assert!(!coordinator.save(&sig, &Tag::non_expiring(), &doc("<a/>")));
    }

    #[test]
    fn test_save_succeeds_if_any_strategy_stores() {
        let coordinator = CacheCoordinator::new()
            .with_strategy(Box::new(BrokenStrategy))
            .with_strategy(Box::new(MemoryCache::default()));
        let sig = InvocationSignature::new("page").with_param("1");

        assert!(coordinator.save(&sig, &Tag::non_expiring(), &doc("<a/>")));
        assert_eq!(coordinator.load(&sig).unwrap().document, doc("<a/>"));

        let report = coordinator.report();
        assert_eq!(report.strategies.len(), 2);
        assert_eq!(report.strategies[0].save_failures, 1);
        assert_eq!(report.strategies[1].saves, 1);
        assert_eq!(report.coordinator.saves, 1);
    }

    #[test]
    fn test_first_hit_wins_without_promotion() {
        let coordinator = CacheCoordinator::new()
            .with_strategy(Box::new(MemoryCache::default()))
            .with_strategy(Box::new(MemoryCache::default()));
        let sig = InvocationSignature::new("page");
        let tag = Tag::non_expiring();

        // Seed only the second strategy through its own key
        let second = coordinator.strategies[1].inner();
        second.save(&second.create_key(&sig), &tag, &doc("<second/>"));

        assert_eq!(coordinator.load(&sig).unwrap().document, doc("<second/>"));
        let report = coordinator.report();
        assert_eq!(report.strategies[0].misses, 1);
        assert_eq!(report.strategies[1].hits, 1);
        // not promoted
        assert_eq!(report.strategies[0].usage.entries, 0);

        coordinator.save(&sig, &tag, &doc("<both/>"));
        assert_eq!(coordinator.load(&sig).unwrap().document, doc("<both/>"));
        assert_eq!(coordinator.report().strategies[1].hits, 1);
    }

    #[test]
    fn test_minimal_cache_time_is_smallest() {
        let coordinator = CacheCoordinator::new()
            .with_strategy(Box::new(MemoryCache::new(MemoryCacheConfig {
                min_cache_time: Duration::from_secs(30),
                ..MemoryCacheConfig::default()
            })))
            .with_strategy(Box::new(BrokenStrategy));
        assert_eq!(coordinator.minimal_cache_time(), Duration::from_secs(1));
        assert_eq!(coordinator.strategy_names(), vec!["Memory", "Broken"]);
    }

    #[test]
    fn test_stats_hit_rate() {
        let coordinator = CacheCoordinator::new().with_strategy(Box::new(MemoryCache::default()));
        let sig = InvocationSignature::new("page");
        coordinator.load(&sig);
        coordinator.save(&sig, &Tag::non_expiring(), &doc("<a/>"));
        coordinator.load(&sig);

        let stats = coordinator.get_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_coalesce_computes_once() {
        let coordinator =
            Arc::new(CacheCoordinator::new().with_strategy(Box::new(MemoryCache::default())));
        let computations = Arc::new(AtomicU64::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let computations = Arc::clone(&computations);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let sig = InvocationSignature::new("expensive");
                    barrier.wait();
                    if let Some(hit) = coordinator.load(&sig) {
                        return hit.document;
                    }
                    coordinator.coalesce(&sig, |contended| {
                        if contended {
                            if let Some(hit) = coordinator.load(&sig) {
                                return hit.document;
                            }
                        }
                        computations.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        let fresh = doc("<computed/>");
                        coordinator.save(&sig, &Tag::non_expiring(), &fresh);
                        fresh
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), doc("<computed/>"));
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.get_stats().in_flight_requests, 0);
    }

    #[test]
    fn test_coalesce_serializes_staggered_arrivals() {
        let coordinator = Arc::new(CacheCoordinator::new());
        let running = Arc::new(AtomicU64::new(0));
        let max_running = Arc::new(AtomicU64::new(0));

        // each caller arrives while the previous one still holds the lock
        let handles: Vec<_> = (0..4_u64)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                let running = Arc::clone(&running);
                let max_running = Arc::clone(&max_running);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(30 * i));
                    let sig = InvocationSignature::new("staggered");
                    coordinator.coalesce(&sig, |_| {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_running.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(55));
                        running.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.get_stats().in_flight_requests, 0);
    }

    #[test]
    fn test_coalesce_keeps_lock_while_callers_queue() {
        let coordinator = CacheCoordinator::new();
        let sig = InvocationSignature::new("queued");
        let key = sig.compose();
        let queued = coordinator.coalesce(&sig, |_| {
            Arc::clone(coordinator.in_flight_requests.get(&key).unwrap().value())
        });

        // a caller still holding a clone keeps the entry
        assert_eq!(coordinator.get_stats().in_flight_requests, 1);
        drop(queued);
        coordinator.coalesce(&sig, |contended| assert!(contended));
        assert_eq!(coordinator.get_stats().in_flight_requests, 0);
    }
}
