//! Cache Strategy Traits
//!
//! This module defines the abstraction every cache backend implements so the
//! [`CacheCoordinator`](crate::coordinator::CacheCoordinator) can chain them.
//!
//! # Architecture
//!
//! - `CacheStrategy`: load/save of tagged documents under a strategy-specific key
//! - `RecordCodec`: byte layout of a stored record (disk file, memcached value)
//!
//! # Example: Custom Strategy
//!
//! ```rust,ignore
//! use tagged_doc_cache::{CacheStrategy, CachedDocument, Document, InvocationSignature, Tag, TagKey};
//! use std::time::Duration;
//!
//! struct NullStrategy;
//!
//! impl CacheStrategy for NullStrategy {
//!     fn name(&self) -> &'static str {
//!         "null"
//!     }
//!
//!     fn minimal_cache_time(&self) -> Duration {
//!         Duration::ZERO
//!     }
//!
//!     fn create_key(&self, signature: &InvocationSignature) -> TagKey {
//!         TagKey::raw(signature)
//!     }
//!
//!     fn load(&self, _key: &TagKey) -> Option<CachedDocument> {
//!         None
//!     }
//!
//!     fn save(&self, _key: &TagKey, _tag: &Tag, _document: &Document) -> bool {
//!         false
//!     }
//! }
//! ```

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

use crate::config::ConfigSource;
use crate::document::Document;
use crate::key::{InvocationSignature, TagKey};
use crate::tag::Tag;

/// A document loaded from a strategy together with its tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDocument {
    pub tag: Tag,
    pub document: Document,
}

impl CachedDocument {
    #[must_use]
    pub fn new(tag: Tag, document: Document) -> Self {
        Self { tag, document }
    }
}

/// Storage gauges reported by a strategy
///
/// Strategies that do not track a gauge leave it at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    /// Entries currently held
    pub entries: u64,
    /// Bytes of document payload currently held
    pub used_memory: u64,
    /// Entries dropped to respect capacity
    pub evicted: u64,
    /// Entries dropped because they expired
    pub expired: u64,
    /// Stored records rejected as corrupt
    pub corrupt: u64,
    /// Lookups that found another key's record under the same storage id
    pub key_clashes: u64,
    /// Records written since the strategy started
    pub writes: u64,
}

/// One pluggable cache backend
///
/// Implementations absorb their own failures: a broken backend reports a miss
/// from `load` and `false` from `save`, it never fails the caller.
///
/// # Thread Safety
///
/// Strategies are shared by every request thread and must be `Send + Sync`.
pub trait CacheStrategy: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &'static str;

    /// Apply configuration before first use
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unusable (bad directory,
    /// unreachable server list, ...).
    fn init(&mut self, _config: &dyn ConfigSource) -> Result<()> {
        Ok(())
    }

    /// Shortest cache time worth storing in this strategy
    fn minimal_cache_time(&self) -> Duration;

    /// Build this strategy's key for an invocation
    fn create_key(&self, signature: &InvocationSignature) -> TagKey;

    /// Look up a fresh document; stale, corrupt or missing entries are misses
    fn load(&self, key: &TagKey) -> Option<CachedDocument>;

    /// Store a document, returning whether it was stored
    fn save(&self, key: &TagKey, tag: &Tag, document: &Document) -> bool;

    /// Current storage gauges
    fn usage(&self) -> StorageUsage {
        StorageUsage::default()
    }
}

/// Byte layout of a stored record
///
/// Codecs are pure: no I/O, no clocks. Decoding failures are reported as
/// errors so the owning strategy can decide between "corrupt" and "miss".
pub trait RecordCodec: Send + Sync {
    /// Decoded form of a record
    type Record;
    /// Decoding failure
    type Error: std::error::Error;

    /// Serialize a record
    fn encode(&self, record: &Self::Record) -> Vec<u8>;

    /// Deserialize a record
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when the bytes do not hold a valid record.
    fn decode(&self, bytes: &[u8]) -> std::result::Result<Self::Record, Self::Error>;

    /// Codec name for logging
    fn name(&self) -> &'static str;
}
