//! Integration tests for the strategy chain
//!
//! Tests first-hit ordering, OR-semantics of saves, persistence across
//! restarts and recovery from corrupt disk records

mod common;

use common::*;
use std::fs;
use std::time::Duration;
use tagged_doc_cache::codecs::SIGNATURE_UNMARKED;
use tagged_doc_cache::tag::now_secs;
use tagged_doc_cache::{
    CacheCoordinator, CacheStrategy, CachedDocument, DiskCache, DiskCacheConfig, Document,
    InvocationSignature, MemoryCache, Tag, TagKey,
};
use tempfile::TempDir;

/// Strategy standing in for an unreachable backend
struct UnavailableBackend;

impl CacheStrategy for UnavailableBackend {
    fn name(&self) -> &'static str {
        "Unavailable"
    }

    fn minimal_cache_time(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn create_key(&self, signature: &InvocationSignature) -> TagKey {
        TagKey::hashed(signature)
    }

    fn load(&self, _key: &TagKey) -> Option<CachedDocument> {
        None
    }

    fn save(&self, _key: &TagKey, _tag: &Tag, _document: &Document) -> bool {
        false
    }
}

fn fresh_tag() -> Tag {
    Tag::expiring_in(now_secs(), Duration::from_secs(600))
}

/// Test that a failing strategy does not fail the save
#[test]
fn test_save_is_logical_or() {
    init_tracing();
    let coordinator = CacheCoordinator::new()
        .with_strategy(Box::new(UnavailableBackend))
        .with_strategy(Box::new(MemoryCache::default()));
    let sig = test_signature("or_save");

    assert!(coordinator.save(&sig, &fresh_tag(), &test_data::doc("kept")));
    assert_eq!(
        coordinator.load(&sig).map(|c| c.document),
        Some(test_data::doc("kept"))
    );

    let report = coordinator.report();
    assert_eq!(report.strategies[0].save_failures, 1);
    assert_eq!(report.strategies[1].save_failures, 0);
    assert_eq!(report.coordinator.save_failures, 0);
}

/// Test that saving fails only when every strategy fails
#[test]
fn test_save_fails_when_all_strategies_fail() {
    init_tracing();
    let coordinator = CacheCoordinator::new()
        .with_strategy(Box::new(UnavailableBackend))
        .with_strategy(Box::new(UnavailableBackend));
    let sig = test_signature("all_fail");

    assert!(!coordinator.save(&sig, &fresh_tag(), &test_data::doc("lost")));
    assert_eq!(coordinator.get_stats().save_failures, 1);
}

/// Test that the disk strategy serves entries written before a restart
#[test]
fn test_disk_survives_restart() {
    let dir = TempDir::new().unwrap_or_else(|_| panic!("Failed to create temp dir"));
    let sig = test_signature("restart");
    let doc = test_data::sized_doc(1);

    {
        let cache = setup_cache_system(&dir).unwrap_or_else(|e| panic!("Failed to setup: {e}"));
        assert!(cache.coordinator().save(&sig, &fresh_tag(), &doc));
    }

    let cache = setup_cache_system(&dir).unwrap_or_else(|e| panic!("Failed to setup: {e}"));
    let cached = cache
        .coordinator()
        .load(&sig)
        .unwrap_or_else(|| panic!("Expected a disk hit"));
    assert_eq!(cached.document, doc);

    let report = cache.report();
    assert_eq!(report.strategies[0].misses, 1);
    assert_eq!(report.strategies[1].hits, 1);
    // hits are not promoted into memory
    assert_eq!(report.strategies[0].usage.entries, 0);
}

/// Test that a record with a damaged signature is dropped and recomputed
#[test]
fn test_corrupt_disk_record_is_discarded() {
    let dir = TempDir::new().unwrap_or_else(|_| panic!("Failed to create temp dir"));
    let sig = test_signature("corrupt");
    let disk = DiskCache::new(DiskCacheConfig::new(dir.path()))
        .unwrap_or_else(|e| panic!("Failed to open disk cache: {e}"));
    let path = disk.path_for(&disk.create_key(&sig));

    {
        let cache = setup_cache_system(&dir).unwrap_or_else(|e| panic!("Failed to setup: {e}"));
        assert!(cache.coordinator().save(&sig, &fresh_tag(), &test_data::doc("fine")));
    }

    let mut bytes = fs::read(&path).unwrap_or_else(|e| panic!("record missing: {e}"));
    assert_eq!(bytes[..4], SIGNATURE_UNMARKED.to_le_bytes());
    bytes[..4].copy_from_slice(&0xdead_beef_u32.to_le_bytes());
    fs::write(&path, &bytes).unwrap_or_else(|e| panic!("rewrite failed: {e}"));

    let cache = setup_cache_system(&dir).unwrap_or_else(|e| panic!("Failed to setup: {e}"));
    assert!(cache.coordinator().load(&sig).is_none());
    assert!(!path.exists());
    assert_eq!(cache.report().strategies[1].usage.corrupt, 1);

    // the slot is usable again
    assert!(cache.coordinator().save(&sig, &fresh_tag(), &test_data::doc("again")));
    assert!(path.exists());
}
