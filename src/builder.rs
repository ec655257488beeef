//! Cache System Builder
//!
//! Provides a builder for constructing a [`CacheSystem`] with an explicit
//! strategy chain, worker count and page timeout.
//!
//! # Example: Memory and Disk
//!
//! ```rust,no_run
//! use tagged_doc_cache::CacheSystemBuilder;
//! use tagged_doc_cache::backends::{DiskCache, DiskCacheConfig, MemoryCache};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystemBuilder::new()
//!         .with_strategy(Box::new(MemoryCache::default()))
//!         .with_strategy(Box::new(DiskCache::new(DiskCacheConfig::new("/var/cache/pages"))?))
//!         .with_threads(8)
//!         .with_timeout(Duration::from_secs(2))
//!         .build()?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Strategy
//!
//! ```rust,ignore
//! use tagged_doc_cache::CacheSystemBuilder;
//!
//! let cache = CacheSystemBuilder::new()
//!     .with_strategy(Box::new(MyCustomStrategy::new()))
//!     .build()?;
//! ```

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::CacheSystem;
use crate::block::PageInvoker;
use crate::coordinator::CacheCoordinator;
use crate::thread_pool::ThreadPool;
use crate::traits::CacheStrategy;

/// Default page wait timeout
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Builder for constructing a [`CacheSystem`]
///
/// # Default Behavior
///
/// With nothing configured the builder produces a system with no cache
/// strategies, no worker threads (every block runs inline) and a 5 second
/// page timeout.
///
/// Strategies are consulted in the order they are added.
pub struct CacheSystemBuilder {
    strategies: Vec<Box<dyn CacheStrategy>>,
    threads: usize,
    timeout: Duration,
}

impl CacheSystemBuilder {
    /// Create a new builder with no strategies configured
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            threads: 0,
            timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Append a cache strategy to the chain
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn CacheStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Number of worker threads for threaded blocks
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// How long a page waits for its blocks
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the cache system
    ///
    /// # Errors
    ///
    /// Returns an error if the worker threads cannot be started.
    pub fn build(self) -> Result<CacheSystem> {
        info!(
            strategies = self.strategies.len(),
            threads = self.threads,
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            "Building Cache System"
        );

        let mut coordinator = CacheCoordinator::new();
        for strategy in self.strategies {
            coordinator.add_strategy(strategy);
        }

        let thread_pool = Arc::new(ThreadPool::new(self.threads)?);
        let invoker = Arc::new(PageInvoker::new(Arc::clone(&thread_pool), self.timeout));

        info!("Cache System built successfully");

        Ok(CacheSystem {
            coordinator: Arc::new(coordinator),
            thread_pool,
            invoker,
        })
    }
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
