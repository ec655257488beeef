//! Configuration access
//!
//! Strategies read their settings through the [`ConfigSource`] trait using
//! `/`-separated paths such as `/cache/memory/pool-size`. Parsing the actual
//! configuration file is the host application's job; [`JsonConfig`] covers
//! the common case of an already-parsed JSON tree.
//!
//! # Example
//!
//! ```rust
//! use tagged_doc_cache::config::{ConfigExt, JsonConfig};
//!
//! let config = JsonConfig::from_str(r#"{"cache": {"memory": {"pools": 4}}}"#).unwrap();
//! assert_eq!(config.as_or("/cache/memory/pools", 16_usize), 4);
//! assert_eq!(config.as_or("/cache/memory/pool-size", 128_usize), 128);
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Read-only view over hierarchical configuration
pub trait ConfigSource: Send + Sync {
    /// Scalar value at `path`, stringified
    fn value(&self, path: &str) -> Option<String>;

    /// Full paths of the direct children of `path`
    fn sub_keys(&self, path: &str) -> Vec<String>;

    /// Whether anything is configured at `path`
    fn contains(&self, path: &str) -> bool {
        self.value(path).is_some() || !self.sub_keys(path).is_empty()
    }
}

/// Typed accessors for any [`ConfigSource`]
pub trait ConfigExt {
    /// Value at `path` parsed as `T`, or `default` when absent or malformed
    fn as_or<T: FromStr>(&self, path: &str, default: T) -> T;

    /// Whole seconds at `path` as a duration
    fn duration_secs_or(&self, path: &str, default: Duration) -> Duration {
        Duration::from_secs(self.as_or(path, default.as_secs()))
    }

    /// Whole milliseconds at `path` as a duration
    fn duration_millis_or(&self, path: &str, default: Duration) -> Duration {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.as_or(path, default_ms))
    }
}

impl<C: ConfigSource + ?Sized> ConfigExt for C {
    fn as_or<T: FromStr>(&self, path: &str, default: T) -> T {
        match self.value(path) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(path = %path, value = %raw, "Malformed config value, using default");
                default
            }),
            None => default,
        }
    }
}

/// [`ConfigSource`] over a JSON document
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    root: Value,
}

impl JsonConfig {
    #[must_use]
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Parse configuration from JSON text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let root = serde_json::from_str(text).context("Failed to parse JSON configuration")?;
        Ok(Self { root })
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_str(&text)
    }

    fn node(&self, path: &str) -> Option<&Value> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(&self.root, |node, part| match node {
                Value::Object(map) => map.get(part),
                Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }
}

impl ConfigSource for JsonConfig {
    fn value(&self, path: &str) -> Option<String> {
        match self.node(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn sub_keys(&self, path: &str) -> Vec<String> {
        let base = path.trim_end_matches('/');
        match self.node(path) {
            Some(Value::Object(map)) => map.keys().map(|k| format!("{base}/{k}")).collect(),
            Some(Value::Array(items)) => (0..items.len()).map(|i| format!("{base}/{i}")).collect(),
            _ => Vec::new(),
        }
    }

    fn contains(&self, path: &str) -> bool {
        self.node(path).is_some_and(|node| !node.is_null())
    }
}
