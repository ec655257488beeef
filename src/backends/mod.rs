//! Cache Strategy Implementations
//!
//! This module contains every [`CacheStrategy`](crate::traits::CacheStrategy)
//! shipped with the crate.
//!
//! # Available Strategies
//!
//! ## In-Process
//! - **Memory** - Sharded LRU pools with prefetch marking (normally first)
//!
//! ## Persistent
//! - **Disk** - One record file per entry, atomic writes, restart-safe prefetch marks
//!
//! ## Distributed
//! - **Memcached** - Shared cache with backend-side expiry (feature: `memcached`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use tagged_doc_cache::backends::{DiskCache, DiskCacheConfig, MemoryCache, MemoryCacheConfig};
//!
//! # fn example() -> anyhow::Result<()> {
//! let memory = MemoryCache::new(MemoryCacheConfig::default());
//! let disk = DiskCache::new(DiskCacheConfig::new("/var/cache/pages"))?;
//! # Ok(())
//! # }
//! ```

// Core strategies (always available)
pub mod disk_cache;
pub mod memory_cache;

// Optional strategies (feature-gated)
#[cfg(feature = "backend-memcached")]
pub mod memcached_cache;

pub use disk_cache::{DiskCache, DiskCacheConfig};
pub use memory_cache::{MemoryCache, MemoryCacheConfig};

#[cfg(feature = "backend-memcached")]
pub use memcached_cache::{MemcachedCache, MemcachedCacheConfig};
