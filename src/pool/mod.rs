//! In-process document pools
//!
//! A [`ShardedPool`] spreads keys over N independent [`StoragePool`]s by a
//! CRC32 checksum of the key, each shard behind its own mutex, so threads
//! working on different keys rarely contend.

mod lru_list;
mod storage_pool;

pub use lru_list::{ListPos, LruList};
pub use storage_pool::{LoadResult, StoragePool};

use parking_lot::Mutex;

use crate::document::Document;
use crate::tag::{Tag, Timestamp};
use crate::traits::StorageUsage;

/// Fixed set of independently locked pools
pub struct ShardedPool {
    shards: Vec<Mutex<StoragePool>>,
}

impl ShardedPool {
    /// `shards` pools of `capacity` entries each; at least one shard is created
    #[must_use]
    pub fn new(shards: usize, capacity: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(StoragePool::new(capacity)))
            .collect();
        Self { shards }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `key`
    #[must_use]
    pub fn shard_index(&self, key: &str) -> usize {
        crc32fast::hash(key.as_bytes()) as usize % self.shards.len()
    }

    #[allow(clippy::indexing_slicing)]
    fn shard(&self, key: &str) -> &Mutex<StoragePool> {
        // never empty, and shard_index reduces modulo len
        &self.shards[self.shard_index(key)]
    }

    pub fn load(&self, key: &str, now: Timestamp) -> LoadResult {
        self.shard(key).lock().load(key, now)
    }

    pub fn save(&self, key: &str, tag: &Tag, document: &Document, now: Timestamp) {
        self.shard(key).lock().save(key, tag, document, now);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).lock().remove(key)
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every shard's gauges
    #[must_use]
    pub fn usage(&self) -> StorageUsage {
        self.shards
            .iter()
            .map(|s| s.lock().usage())
            .fold(StorageUsage::default(), |mut total, u| {
                total.entries += u.entries;
                total.used_memory += u.used_memory;
                total.evicted += u.evicted;
                total.expired += u.expired;
                total
            })
    }
}
