//! Memory Cache - Pool-Backed In-Process Strategy
//!
//! Keeps tagged documents in a [`ShardedPool`] inside the current process.
//! Keys are the raw composed key text; nothing survives a restart.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ConfigExt, ConfigSource};
use crate::document::Document;
use crate::key::{InvocationSignature, TagKey};
use crate::pool::{LoadResult, ShardedPool};
use crate::tag::{Tag, Timestamp, now_secs};
use crate::traits::{CacheStrategy, CachedDocument, StorageUsage};

/// Configuration for [`MemoryCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Number of independently locked pools
    pub pools: usize,
    /// Capacity of each pool; 0 means unbounded
    pub pool_size: usize,
    /// Shortest cache time worth keeping in memory
    pub min_cache_time: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            pools: 16,
            pool_size: 128,
            min_cache_time: Duration::from_secs(5),
        }
    }
}

impl MemoryCacheConfig {
    /// Read `pools`, `pool-size` and `min-cache-time` under `prefix`
    #[must_use]
    pub fn from_source(config: &dyn ConfigSource, prefix: &str) -> Self {
        let defaults = Self::default();
        Self {
            pools: config.as_or(&format!("{prefix}/pools"), defaults.pools),
            pool_size: config.as_or(&format!("{prefix}/pool-size"), defaults.pool_size),
            min_cache_time: config
                .duration_secs_or(&format!("{prefix}/min-cache-time"), defaults.min_cache_time),
        }
    }
}

/// In-process tagged document cache
///
/// This is the fastest strategy and is normally registered first:
/// - Sharded pools with per-shard locks
/// - LRU eviction per shard, expired entries swept first
/// - Prefetch marking kept per entry
pub struct MemoryCache {
    config: MemoryCacheConfig,
    pool: ShardedPool,
    /// Prefetch signals handed out
    prefetches: AtomicU64,
}

impl MemoryCache {
    /// Create a memory cache
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        info!(
            pools = config.pools,
            pool_size = config.pool_size,
            min_cache_time_secs = config.min_cache_time.as_secs(),
            "Initializing Memory Cache"
        );
        Self {
            pool: ShardedPool::new(config.pools, config.pool_size),
            config,
            prefetches: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Number of prefetch signals returned so far
    #[must_use]
    pub fn prefetch_count(&self) -> u64 {
        self.prefetches.load(Ordering::Relaxed)
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.pool.clear();
    }

    /// Load at an explicit time
    pub fn load_at(&self, key: &TagKey, now: Timestamp) -> Option<CachedDocument> {
        match self.pool.load(key.storage_id(), now) {
            LoadResult::Success(cached) => Some(cached),
            LoadResult::NotFound => None,
            LoadResult::Expired => {
                debug!(key = %key, "[Memory] Entry expired");
                None
            }
            LoadResult::NeedPrefetch => {
                self.prefetches.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "[Memory] Entry due for prefetch");
                None
            }
        }
    }

    /// Save at an explicit time
    pub fn save_at(&self, key: &TagKey, tag: &Tag, document: &Document, now: Timestamp) -> bool {
        self.pool.save(key.storage_id(), tag, document, now);
        debug!(key = %key, size = document.len(), "[Memory] Cached document");
        true
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl CacheStrategy for MemoryCache {
    fn name(&self) -> &'static str {
        "Memory"
    }

    fn init(&mut self, config: &dyn ConfigSource) -> Result<()> {
        let config = MemoryCacheConfig::from_source(config, "/cache/memory");
        if config != self.config {
            *self = Self::new(config);
        }
        Ok(())
    }

    fn minimal_cache_time(&self) -> Duration {
        self.config.min_cache_time
    }

    fn create_key(&self, signature: &InvocationSignature) -> TagKey {
        TagKey::raw(signature)
    }

    fn load(&self, key: &TagKey) -> Option<CachedDocument> {
        self.load_at(key, now_secs())
    }

    fn save(&self, key: &TagKey, tag: &Tag, document: &Document) -> bool {
        self.save_at(key, tag, document, now_secs())
    }

    fn usage(&self) -> StorageUsage {
        self.pool.usage()
    }
}
