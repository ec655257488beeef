//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Log initialization
//! - Unique keys and signatures
//! - Cache system setup over temporary directories
//! - Scripted blocks with controllable latency

#![allow(dead_code)]

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tagged_doc_cache::config::JsonConfig;
use tagged_doc_cache::tag::now_secs;
use tagged_doc_cache::{
    Block, BlockError, CacheSystem, Document, InvocationSignature, Request, Tag, TaggedOutput,
    TaggedWork,
};
use tempfile::TempDir;

/// Route `tracing` output to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Signature that no other test shares
pub fn test_signature(name: &str) -> InvocationSignature {
    InvocationSignature::new(test_key(name)).with_param("1")
}

/// Configuration with memory and disk sections rooted in `dir`
pub fn memory_disk_config(dir: &TempDir, threads: usize, timeout_ms: u64) -> JsonConfig {
    JsonConfig::new(serde_json::json!({
        "cache": {
            "memory": {"pools": 4, "pool-size": 64, "min-cache-time": 1},
            "disk": {"root-dir": dir.path().to_string_lossy(), "min-cache-time": 1},
            "threads": threads,
            "invoke-timeout-ms": timeout_ms,
        }
    }))
}

/// Initialize a memory + disk cache system for testing
pub fn setup_cache_system(dir: &TempDir) -> Result<CacheSystem> {
    init_tracing();
    CacheSystem::from_config(&memory_disk_config(dir, 4, 2_000))
}

/// Poll `condition` until it holds or `timeout_ms` passes
pub fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }

    false
}

/// Generate test documents
pub mod test_data {
    use tagged_doc_cache::Document;

    pub fn doc(name: &str) -> Document {
        Document::parse(format!("<{name}/>")).unwrap_or_else(|e| panic!("bad test doc: {e}"))
    }

    /// Document of roughly `size_kb` kilobytes
    pub fn sized_doc(size_kb: usize) -> Document {
        let body = "x".repeat(size_kb * 1024);
        Document::parse(format!("<data>{body}</data>"))
            .unwrap_or_else(|e| panic!("bad test doc: {e}"))
    }
}

/// Cacheable work that counts runs and can be slowed down
pub struct ScriptedWork {
    pub name: String,
    pub delay: Duration,
    pub ttl: Duration,
    pub runs: Arc<AtomicU64>,
}

impl ScriptedWork {
    pub fn new(name: &str, delay: Duration, ttl: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            ttl,
            runs: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl TaggedWork for ScriptedWork {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self, request: &Request) -> InvocationSignature {
        InvocationSignature::new(self.name.clone())
            .with_param(request.arg("id").unwrap_or_default())
    }

    fn execute(&self, request: &Request) -> Result<TaggedOutput, BlockError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        thread::sleep(self.delay);
        Ok(TaggedOutput {
            document: Document::parse(format!(
                "<{} id=\"{}\" run=\"{run}\"/>",
                self.name,
                request.arg("id").unwrap_or_default()
            ))?,
            tag: Tag::expiring_in(now_secs(), self.ttl),
        })
    }
}

/// Uncached block with a fixed latency and outcome
pub struct SleepyBlock {
    pub name: String,
    pub delay: Duration,
    pub threaded: bool,
    pub outcome: Outcome,
}

pub enum Outcome {
    Document,
    Error,
    Panic,
}

impl SleepyBlock {
    pub fn new(name: &str, delay_ms: u64, threaded: bool) -> Arc<dyn Block> {
        Self::with_outcome(name, delay_ms, threaded, Outcome::Document)
    }

    pub fn with_outcome(
        name: &str,
        delay_ms: u64,
        threaded: bool,
        outcome: Outcome,
    ) -> Arc<dyn Block> {
        Arc::new(Self {
            name: name.to_string(),
            delay: Duration::from_millis(delay_ms),
            threaded,
            outcome,
        })
    }
}

impl Block for SleepyBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn threaded(&self) -> bool {
        self.threaded
    }

    fn call(&self, _request: &Request) -> Result<Document, BlockError> {
        thread::sleep(self.delay);
        match self.outcome {
            Outcome::Document => Ok(test_data::doc(&self.name)),
            Outcome::Error => Err(BlockError::Failed(format!("{} is broken", self.name))),
            Outcome::Panic => panic!("{} exploded", self.name),
        }
    }
}

/// Assert that coordinator stats meet expectations
#[macro_export]
macro_rules! assert_cache_stats {
    ($cache:expr, $field:ident > $value:expr) => {
        let stats = $cache.coordinator().get_stats();
        assert!(
            stats.$field > $value,
            "Expected {} > {}, got {}",
            stringify!($field),
            $value,
            stats.$field
        );
    };
    ($cache:expr, $field:ident == $value:expr) => {
        let stats = $cache.coordinator().get_stats();
        assert_eq!(
            stats.$field,
            $value,
            "Expected {} == {}, got {}",
            stringify!($field),
            $value,
            stats.$field
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("user");
        let key2 = test_key("user");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_user_"));
    }

    #[test]
    fn test_data_generation() {
        assert_eq!(test_data::doc("a").as_str(), "<a/>");
        assert!(test_data::sized_doc(2).len() > 2048);
    }
}
