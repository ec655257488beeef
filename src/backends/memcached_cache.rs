//! Memcached Cache - Distributed Cache Strategy
//!
//! Memcached-based shared cache. Entries are stored under the hex SHA-256
//! digest of the composed key, which keeps keys under memcached's 250 byte
//! ceiling, and expire through memcached's own TTL handling.

use anyhow::{Result, anyhow};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codecs::{MemcachedValue, MemcachedValueCodec};
use crate::config::{ConfigExt, ConfigSource};
use crate::document::Document;
use crate::key::{InvocationSignature, TagKey};
use crate::tag::{Tag, UNDEFINED_TIME};
use crate::traits::{CacheStrategy, CachedDocument, RecordCodec, StorageUsage};

/// Configuration for [`MemcachedCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcachedCacheConfig {
    /// Server URLs, e.g. `memcache://127.0.0.1:11211`
    pub servers: Vec<String>,
    /// Shortest cache time worth sending to memcached
    pub min_cache_time: Duration,
}

impl Default for MemcachedCacheConfig {
    fn default() -> Self {
        let url = std::env::var("MEMCACHED_URL")
            .unwrap_or_else(|_| "memcache://127.0.0.1:11211".to_string());
        Self {
            servers: vec![url],
            min_cache_time: Duration::from_secs(5),
        }
    }
}

impl MemcachedCacheConfig {
    /// Read `servers/*` and `min-cache-time` under `prefix`
    ///
    /// Falls back to `MEMCACHED_URL` when no server is listed.
    #[must_use]
    pub fn from_source(config: &dyn ConfigSource, prefix: &str) -> Self {
        let defaults = Self::default();
        let servers: Vec<String> = config
            .sub_keys(&format!("{prefix}/servers"))
            .iter()
            .filter_map(|path| config.value(path))
            .collect();
        Self {
            servers: if servers.is_empty() {
                defaults.servers
            } else {
                servers
            },
            min_cache_time: config
                .duration_secs_or(&format!("{prefix}/min-cache-time"), defaults.min_cache_time),
        }
    }
}

/// Memcached tagged document cache
///
/// **Note**: memcached drops expired values on its own, so loads do not
/// re-check expiry and there is no prefetch marking for this strategy.
pub struct MemcachedCache {
    /// Memcached client
    client: memcache::Client,
    config: MemcachedCacheConfig,
    codec: MemcachedValueCodec,
    /// Values rejected on load
    corrupt: AtomicU64,
    /// Backend errors on get/set
    failures: AtomicU64,
}

impl MemcachedCache {
    /// Connect to the configured servers
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the servers do
    /// not answer a version request.
    pub fn new(config: MemcachedCacheConfig) -> Result<Self> {
        info!(servers = ?config.servers, "Initializing Memcached Cache");

        let client = memcache::Client::connect(config.servers.clone())
            .map_err(|e| anyhow!("Failed to connect to Memcached: {e}"))?;

        match client.version() {
            Ok(versions) => {
                info!(
                    server_count = versions.len(),
                    "Memcached Cache connected successfully"
                );
            }
            Err(e) => {
                return Err(anyhow!("Memcached connection test failed: {e}"));
            }
        }

        Ok(Self {
            client,
            config,
            codec: MemcachedValueCodec,
            corrupt: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    /// Backend errors seen so far
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Memcached expiration argument for a tag
///
/// Memcached reads values above 30 days as absolute Unix time, which every
/// real expiry timestamp is; 0 stores without expiry.
#[must_use]
pub fn expiration_for(tag: &Tag) -> u32 {
    if tag.expire_time == UNDEFINED_TIME {
        return 0;
    }
    u32::try_from(tag.expire_time).unwrap_or(u32::MAX)
}

impl CacheStrategy for MemcachedCache {
    fn name(&self) -> &'static str {
        "Memcached"
    }

    fn init(&mut self, config: &dyn ConfigSource) -> Result<()> {
        *self = Self::new(MemcachedCacheConfig::from_source(config, "/cache/memcached"))?;
        Ok(())
    }

    fn minimal_cache_time(&self) -> Duration {
        self.config.min_cache_time
    }

    fn create_key(&self, signature: &InvocationSignature) -> TagKey {
        TagKey::hashed(signature)
    }

    fn load(&self, key: &TagKey) -> Option<CachedDocument> {
        match self.client.get::<Vec<u8>>(key.storage_id()) {
            Ok(Some(bytes)) => match self.codec.decode(&bytes) {
                Ok(value) => Some(CachedDocument::new(value.tag, value.document)),
                Err(e) => {
                    self.corrupt.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = %key,
                        codec = self.codec.name(),
                        error = %e,
                        "[Memcached] Unusable cached value"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "[Memcached] GET failed");
                None
            }
        }
    }

    fn save(&self, key: &TagKey, tag: &Tag, document: &Document) -> bool {
        let bytes = self.codec.encode(&MemcachedValue {
            tag: *tag,
            document: document.clone(),
        });

        match self
            .client
            .set(key.storage_id(), bytes.as_slice(), expiration_for(tag))
        {
            Ok(()) => {
                debug!(key = %key, expire_time = tag.expire_time, "[Memcached] Cached document");
                true
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "[Memcached] SET failed");
                false
            }
        }
    }

    fn usage(&self) -> StorageUsage {
        StorageUsage {
            corrupt: self.corrupt.load(Ordering::Relaxed),
            ..StorageUsage::default()
        }
    }
}
