//! Tagged Document Cache
//!
//! Caching and concurrent invocation for pages assembled from blocks:
//! - **Tagged Cache**: Ordered chain of strategies (memory, disk, memcached) sharing freshness rules
//! - **Prefetch**: Entries report stale slightly before expiry so one caller refreshes them
//! - **Sharded LRU Pools**: Per-shard locks, expired entries swept before LRU eviction
//! - **Crash-Safe Disk Records**: Atomic rename writes, corrupt files dropped on sight
//! - **Bounded Invocation**: Worker pool with caller-runs backpressure and deadline-bound page waits
//! - **Statistics**: Per-strategy hit/miss/save latency and coordinator hit rates
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tagged_doc_cache::{
//!     Block, BlockError, CacheSystem, Document, InvocationSignature, Request, Tag,
//!     TaggedBlock, TaggedOutput, TaggedWork,
//! };
//! use tagged_doc_cache::config::JsonConfig;
//!
//! struct Weather;
//!
//! impl TaggedWork for Weather {
//!     fn name(&self) -> &str {
//!         "weather"
//!     }
//!
//!     fn signature(&self, request: &Request) -> InvocationSignature {
//!         InvocationSignature::new("weather").with_param(request.arg("city").unwrap_or("moscow"))
//!     }
//!
//!     fn execute(&self, _request: &Request) -> Result<TaggedOutput, BlockError> {
//!         Ok(TaggedOutput {
//!             document: Document::parse("<weather t=\"-3\"/>")?,
//!             tag: Tag::expiring_in(tagged_doc_cache::tag::now_secs(), std::time::Duration::from_secs(300)),
//!         })
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = JsonConfig::from_str(r#"{"cache": {"memory": {}, "threads": 4}}"#)?;
//!     let cache = CacheSystem::from_config(&config)?;
//!
//!     let blocks: Vec<Arc<dyn Block>> = vec![Arc::new(
//!         TaggedBlock::new(Weather, Arc::clone(cache.coordinator())).with_threaded(true),
//!     )];
//!     let documents = cache.invoker().invoke(&blocks, &Arc::new(Request::new("/")));
//!     tracing::info!("Rendered {} blocks", documents.len());
//!
//!     let report = cache.report();
//!     tracing::info!("Hit rate: {:.2}%", report.coordinator.hit_rate);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Page → PageInvoker → Block (inline | ThreadPool) → InvocationContext slot
//!                        ↓ TaggedBlock
//!                      CacheCoordinator → Memory → Disk → Memcached (first hit wins)
//!                        ↓ Miss
//!                      Compute → storage policy → save to every strategy
//! ```

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub mod backends;
pub mod block;
pub mod builder;
pub mod codecs;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod invocation;
pub mod key;
pub mod pool;
pub mod prefetch;
pub mod profiled;
pub mod tag;
pub mod thread_pool;
pub mod traits;

pub use backends::{DiskCache, DiskCacheConfig, MemoryCache, MemoryCacheConfig};

// Optional backends (feature-gated)
#[cfg(feature = "backend-memcached")]
pub use backends::{MemcachedCache, MemcachedCacheConfig};

pub use block::{
    Block, BlockError, CacheLookup, PageInvoker, Request, SkipReason, TaggedBlock, TaggedOutput,
    TaggedWork,
};
pub use builder::CacheSystemBuilder;
pub use config::{ConfigExt, ConfigSource, JsonConfig};
pub use coordinator::{CacheCoordinator, CacheReport, CoordinatorStats};
pub use document::{Document, DocumentError};
pub use invocation::{InvocationContext, InvocationError, WaitOutcome};
pub use key::{InvocationSignature, TagKey};
pub use profiled::{ProfiledStrategy, StrategyReport};
pub use tag::{Tag, Timestamp, UNDEFINED_TIME};
pub use thread_pool::{Dispatch, ThreadPool};
pub use traits::{CacheStrategy, CachedDocument, RecordCodec, StorageUsage};

/// Main entry point: the strategy chain, the worker pool and the page invoker
///
/// There is no global instance; build one at startup and pass it to
/// whatever renders pages.
///
/// # Example
///
/// ```rust,no_run
/// use tagged_doc_cache::CacheSystem;
///
/// fn main() -> anyhow::Result<()> {
///     let cache = CacheSystem::new()?;
///     let coordinator = cache.coordinator();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CacheSystem {
    /// Ordered strategy chain (primary cache interface)
    pub coordinator: Arc<CacheCoordinator>,
    /// Workers for threaded blocks
    pub thread_pool: Arc<ThreadPool>,
    /// Page invocation with the configured timeout
    pub invoker: Arc<PageInvoker>,
}

impl CacheSystem {
    /// Create a cache system with a default memory strategy and no workers
    ///
    /// # Errors
    ///
    /// Returns an error if the system cannot be assembled.
    pub fn new() -> Result<Self> {
        info!("Initializing Tagged Document Cache System");
        CacheSystemBuilder::new()
            .with_strategy(Box::new(MemoryCache::default()))
            .build()
    }

    /// Create a cache system from configuration
    ///
    /// Strategies are registered memory, disk, memcached, each only when its
    /// section under `/cache` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured strategy cannot be initialized (for
    /// example an unwritable disk root or unreachable memcached servers) or
    /// the worker threads cannot be started.
    pub fn from_config(config: &dyn ConfigSource) -> Result<Self> {
        info!("Initializing Tagged Document Cache System from configuration");

        let mut builder = CacheSystemBuilder::new()
            .with_threads(config.as_or("/cache/threads", 0))
            .with_timeout(
                config.duration_millis_or(
                    "/cache/invoke-timeout-ms",
                    crate::builder::DEFAULT_INVOKE_TIMEOUT,
                ),
            );

        if config.contains("/cache/memory") {
            let mut memory = MemoryCache::default();
            memory.init(config)?;
            builder = builder.with_strategy(Box::new(memory));
        }

        if config.contains("/cache/disk") {
            let disk = DiskCache::new(DiskCacheConfig::from_source(config, "/cache/disk")?)?;
            builder = builder.with_strategy(Box::new(disk));
        }

        if config.contains("/cache/memcached") {
            #[cfg(feature = "backend-memcached")]
            {
                let memcached = MemcachedCache::new(MemcachedCacheConfig::from_source(
                    config,
                    "/cache/memcached",
                ))?;
                builder = builder.with_strategy(Box::new(memcached));
            }
            #[cfg(not(feature = "backend-memcached"))]
            warn!("Ignoring /cache/memcached: built without the `memcached` feature");
        }

        let system = builder.build()?;
        if system.coordinator.strategy_count() == 0 {
            warn!("No cache strategies configured, every block will compute");
        }
        Ok(system)
    }

    /// Get reference to the coordinator
    #[must_use]
    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub fn invoker(&self) -> &Arc<PageInvoker> {
        &self.invoker
    }

    #[must_use]
    pub fn thread_pool(&self) -> &Arc<ThreadPool> {
        &self.thread_pool
    }

    /// Coordinator and per-strategy statistics
    #[must_use]
    pub fn report(&self) -> CacheReport {
        self.coordinator.report()
    }
}
