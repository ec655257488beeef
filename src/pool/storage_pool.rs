//! Storage Pool - Hash Map + LRU List
//!
//! One self-contained in-process cache shard. Entries live in a `HashMap`;
//! recency lives in an [`LruList`] of keys whose tail is the most recently
//! touched entry. The pool itself is not synchronized: [`ShardedPool`]
//! wraps each pool in its own mutex.
//!
//! [`ShardedPool`]: super::ShardedPool

use std::collections::HashMap;

use super::lru_list::{ListPos, LruList};
use crate::document::Document;
use crate::prefetch::need_prefetch_at;
use crate::tag::{Tag, Timestamp};
use crate::traits::{CachedDocument, StorageUsage};

/// Outcome of [`StoragePool::load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    /// Fresh entry, copied out
    Success(CachedDocument),
    /// No entry under the key
    NotFound,
    /// Entry was expired and has been removed
    Expired,
    /// Entry is due for an early refresh; it stays in the pool
    NeedPrefetch,
}

impl LoadResult {
    /// The document on success, `None` for every kind of miss
    #[must_use]
    pub fn into_hit(self) -> Option<CachedDocument> {
        match self {
            Self::Success(doc) => Some(doc),
            Self::NotFound | Self::Expired | Self::NeedPrefetch => None,
        }
    }
}

/// Entry owned by a pool
#[derive(Debug)]
struct CacheEntry {
    tag: Tag,
    document: Document,
    lru_pos: ListPos,
    stored_time: Timestamp,
    prefetch_marked: bool,
    size_bytes: usize,
}

/// Hash map + LRU list cache shard
///
/// A capacity of 0 disables LRU eviction; entries then leave only by expiry.
pub struct StoragePool {
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    lru: LruList<String>,
    used_memory: usize,
    evicted: u64,
    expired: u64,
}

impl StoragePool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            lru: LruList::new(),
            used_memory: 0,
            evicted: 0,
            expired: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key` at time `now`
    pub fn load(&mut self, key: &str, now: Timestamp) -> LoadResult {
        let Some(entry) = self.entries.get_mut(key) else {
            return LoadResult::NotFound;
        };

        if entry.tag.expired_at(now) {
            self.remove_entry(key);
            self.expired += 1;
            return LoadResult::Expired;
        }

        if !entry.prefetch_marked && need_prefetch_at(&entry.tag, entry.stored_time, now) {
            entry.prefetch_marked = true;
            return LoadResult::NeedPrefetch;
        }

        let loaded = CachedDocument::new(entry.tag, entry.document.clone());
        let pos = entry.lru_pos;
        self.lru.move_to_back(pos);
        LoadResult::Success(loaded)
    }

    /// Store a copy of `document` under `key` at time `now`
    pub fn save(&mut self, key: &str, tag: &Tag, document: &Document, now: Timestamp) {
        if let Some(entry) = self.entries.get_mut(key) {
            self.used_memory = self.used_memory - entry.size_bytes + document.len();
            entry.tag = *tag;
            entry.document = document.clone();
            entry.size_bytes = document.len();
            entry.stored_time = now;
            entry.prefetch_marked = false;
            let pos = entry.lru_pos;
            self.lru.move_to_back(pos);
            return;
        }

        if self.capacity > 0 && self.entries.len() >= self.capacity {
            self.shrink(now);
        }

        let lru_pos = self.lru.push_back(key.to_string());
        self.used_memory += document.len();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                tag: *tag,
                document: document.clone(),
                lru_pos,
                stored_time: now,
                prefetch_marked: false,
                size_bytes: document.len(),
            },
        );
    }

    /// Drop expired entries, then least recently used ones until there is
    /// room for one more entry
    pub fn shrink(&mut self, now: Timestamp) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.tag.expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove_entry(key);
        }
        self.expired += expired.len() as u64;

        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.lru.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.used_memory -= entry.size_bytes;
                self.evicted += 1;
            }
        }
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.used_memory = 0;
    }

    #[must_use]
    pub fn usage(&self) -> StorageUsage {
        StorageUsage {
            entries: self.entries.len() as u64,
            used_memory: self.used_memory as u64,
            evicted: self.evicted,
            expired: self.expired,
            ..StorageUsage::default()
        }
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.lru.remove(entry.lru_pos);
                self.used_memory -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Map and list agree on size and every entry's list node holds its key
    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.entries.len(), self.lru.len());
        for (key, entry) in &self.entries {
            assert_eq!(self.lru.get(entry.lru_pos), Some(key));
        }
        let total: usize = self.entries.values().map(|e| e.size_bytes).sum();
        assert_eq!(total, self.used_memory);
    }
}
