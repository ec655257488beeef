//! Integration tests for page invocation
//!
//! Tests slot ordering, timeout completeness, block failures and the thread
//! pool's caller-runs fallback

mod common;

use common::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tagged_doc_cache::{CacheSystemBuilder, Dispatch, Request, ThreadPool};

fn request() -> Arc<Request> {
    Arc::new(Request::new("/index"))
}

/// Test that documents come back in block order regardless of finish order
#[test]
fn test_results_follow_block_order() {
    init_tracing();
    let cache = CacheSystemBuilder::new()
        .with_threads(3)
        .with_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|e| panic!("Failed to build: {e}"));
    assert!(wait_for(|| cache.thread_pool().idle_workers() == 3, 2_000));

    let blocks = vec![
        SleepyBlock::new("slow", 80, true),
        SleepyBlock::new("inline", 0, false),
        SleepyBlock::new("fast", 5, true),
    ];
    let documents = cache.invoker().invoke(&blocks, &request());

    let texts: Vec<&str> = documents.iter().map(|d| d.as_str()).collect();
    assert_eq!(texts, vec!["<slow/>", "<inline/>", "<fast/>"]);
}

/// Test that a timed-out page still gets one document per block
#[test]
fn test_timeout_fills_every_slot() {
    init_tracing();
    let cache = CacheSystemBuilder::new()
        .with_threads(3)
        .with_timeout(Duration::from_millis(50))
        .build()
        .unwrap_or_else(|e| panic!("Failed to build: {e}"));
    assert!(wait_for(|| cache.thread_pool().idle_workers() == 3, 2_000));

    let blocks = vec![
        SleepyBlock::new("a", 400, true),
        SleepyBlock::new("b", 400, true),
        SleepyBlock::new("c", 400, true),
    ];

    let start = Instant::now();
    let documents = cache.invoker().invoke(&blocks, &request());
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(350), "waited {elapsed:?}");
    assert_eq!(documents.len(), 3);
    for (document, name) in documents.iter().zip(["a", "b", "c"]) {
        assert!(document.is_error(), "{name} should have timed out");
        assert!(document.as_str().contains(name));
    }
}

/// Test that failing and panicking blocks become error documents
#[test]
fn test_block_failures_become_error_documents() {
    init_tracing();
    let cache = CacheSystemBuilder::new()
        .with_threads(2)
        .build()
        .unwrap_or_else(|e| panic!("Failed to build: {e}"));
    assert!(wait_for(|| cache.thread_pool().idle_workers() == 2, 2_000));

    let blocks = vec![
        SleepyBlock::with_outcome("broken", 0, false, Outcome::Error),
        SleepyBlock::with_outcome("exploding", 0, true, Outcome::Panic),
        SleepyBlock::new("healthy", 0, true),
    ];

    let start = Instant::now();
    let documents = cache.invoker().invoke(&blocks, &request());

    // a panicking block fills its slot instead of running into the timeout
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(documents[0].is_error());
    assert!(documents[0].as_str().contains("broken is broken"));
    assert!(documents[1].is_error());
    assert!(documents[1].as_str().contains("exploding"));
    assert_eq!(documents[2].as_str(), "<healthy/>");
}

/// Test that a saturated pool runs work on the caller
#[test]
fn test_saturated_pool_runs_inline() {
    init_tracing();
    let pool = ThreadPool::new(1).unwrap_or_else(|e| panic!("Failed to start pool: {e}"));
    assert!(wait_for(|| pool.idle_workers() == 1, 2_000));

    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    assert_eq!(
        pool.invoke(move || {
            let _ = release_rx.recv();
        }),
        Dispatch::Queued
    );

    let caller = std::thread::current().id();
    let (tx, rx) = std::sync::mpsc::channel();
    assert_eq!(
        pool.invoke(move || {
            let _ = tx.send(std::thread::current().id());
        }),
        Dispatch::Inline
    );
    assert_eq!(rx.recv().ok(), Some(caller));
    assert_eq!(pool.queued_runs(), 1);
    assert_eq!(pool.inline_runs(), 1);

    drop(release_tx);
}

/// Test that a pool without workers still completes pages
#[test]
fn test_pages_without_workers_run_inline() {
    init_tracing();
    let cache = CacheSystemBuilder::new()
        .build()
        .unwrap_or_else(|e| panic!("Failed to build: {e}"));

    let blocks = vec![SleepyBlock::new("x", 0, true), SleepyBlock::new("y", 0, true)];
    let documents = cache.invoker().invoke(&blocks, &request());

    assert_eq!(documents[0].as_str(), "<x/>");
    assert_eq!(documents[1].as_str(), "<y/>");
    assert_eq!(cache.thread_pool().inline_runs(), 2);
}
