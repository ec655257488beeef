//! Disk Cache - File-Per-Entry Persistent Strategy
//!
//! Each entry is one record file (see [`crate::codecs::DiskRecordCodec`])
//! at `root/xx/yyyy...`, where `xxyyyy...` is the hex SHA-256 digest of the
//! composed key. The two-level layout bounds directory fan-out.
//!
//! Writes go to a uniquely named temporary file in the target directory and
//! are renamed over the target, so concurrent writers of one key race only
//! on which rename lands last, never on partial content.

use anyhow::{Context, Result, anyhow};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codecs::{DiskRecord, DiskRecordCodec, RecordError, SIGNATURE_PREFETCH_MARKED};
use crate::config::{ConfigExt, ConfigSource};
use crate::document::Document;
use crate::key::{InvocationSignature, TagKey, hex_digest};
use crate::prefetch::need_prefetch_at;
use crate::tag::{Tag, Timestamp, now_secs};
use crate::traits::{CacheStrategy, CachedDocument, RecordCodec, StorageUsage};

/// Configuration for [`DiskCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCacheConfig {
    /// Directory holding the record tree
    pub root_dir: PathBuf,
    /// Shortest cache time worth writing to disk
    pub min_cache_time: Duration,
}

impl DiskCacheConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            min_cache_time: Duration::from_secs(5),
        }
    }

    /// Read `root-dir` and `min-cache-time` under `prefix`
    ///
    /// # Errors
    ///
    /// Returns an error if `root-dir` is not configured.
    pub fn from_source(config: &dyn ConfigSource, prefix: &str) -> Result<Self> {
        let root_dir = config
            .value(&format!("{prefix}/root-dir"))
            .ok_or_else(|| anyhow!("Disk cache requires {prefix}/root-dir"))?;
        Ok(Self {
            root_dir: PathBuf::from(root_dir),
            min_cache_time: config
                .duration_secs_or(&format!("{prefix}/min-cache-time"), Duration::from_secs(5)),
        })
    }
}

/// On-disk tagged document cache
///
/// Survives restarts, including each entry's prefetch mark. Corrupt files
/// are deleted on sight; files belonging to a different key that happens to
/// share the digest are left alone.
pub struct DiskCache {
    config: DiskCacheConfig,
    codec: DiskRecordCodec,
    stored: AtomicU64,
    expired: AtomicU64,
    corrupt: AtomicU64,
    key_clashes: AtomicU64,
}

impl DiskCache {
    /// Create a disk cache rooted at `config.root_dir`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(config: DiskCacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_dir).with_context(|| {
            format!(
                "Failed to create disk cache root {}",
                config.root_dir.display()
            )
        })?;
        info!(
            root_dir = %config.root_dir.display(),
            min_cache_time_secs = config.min_cache_time.as_secs(),
            "Initializing Disk Cache"
        );
        Ok(Self {
            config,
            codec: DiskRecordCodec,
            stored: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
            key_clashes: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    /// File holding `key`'s record
    #[must_use]
    pub fn path_for(&self, key: &TagKey) -> PathBuf {
        self.config.root_dir.join(key.storage_id())
    }

    /// Load at an explicit time
    pub fn load_at(&self, key: &TagKey, now: Timestamp) -> Option<CachedDocument> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "[Disk] Failed to read cache file");
                return None;
            }
        };

        let header = match self.codec.decode_header(&bytes) {
            Ok(header) => header,
            Err(e) => {
                self.discard_corrupt(&path, &e);
                return None;
            }
        };

        if header.key != key.text() {
            self.key_clashes.fetch_add(1, Ordering::Relaxed);
            warn!(
                key = %key,
                stored_key = %header.key,
                path = %path.display(),
                "[Disk] Key clash, treating as miss"
            );
            return None;
        }

        if header.tag.expired_at(now) {
            self.expired.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[Disk] Entry expired");
            remove_quietly(&path);
            return None;
        }

        if !header.prefetch_marked && need_prefetch_at(&header.tag, header.stored_time, now) {
            debug!(key = %key, "[Disk] Entry due for prefetch");
            if let Err(e) = mark_prefetched(&path) {
                warn!(path = %path.display(), error = %e, "[Disk] Failed to persist prefetch mark");
            }
            return None;
        }

        match self.codec.decode_document(&bytes, &header) {
            Ok(document) => Some(CachedDocument::new(header.tag, document)),
            Err(e) => {
                self.discard_corrupt(&path, &e);
                None
            }
        }
    }

    /// Save at an explicit time
    pub fn save_at(&self, key: &TagKey, tag: &Tag, document: &Document, now: Timestamp) -> bool {
        let path = self.path_for(key);
        let record = DiskRecord {
            prefetch_marked: false,
            tag: *tag,
            stored_time: now,
            key: key.text().to_string(),
            document: document.clone(),
        };

        match write_atomically(&path, &self.codec.encode(&record)) {
            Ok(()) => {
                self.stored.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, path = %path.display(), "[Disk] Cached document");
                true
            }
            Err(e) => {
                error!(key = %key, path = %path.display(), error = %e, "[Disk] Failed to save document");
                false
            }
        }
    }

    /// Delete `key`'s record, returning whether one existed
    pub fn remove(&self, key: &TagKey) -> bool {
        fs::remove_file(self.path_for(key)).is_ok()
    }

    fn discard_corrupt(&self, path: &Path, reason: &RecordError) {
        self.corrupt.fetch_add(1, Ordering::Relaxed);
        warn!(
            path = %path.display(),
            codec = self.codec.name(),
            reason = %reason,
            "[Disk] Corrupt cache file removed"
        );
        remove_quietly(path);
    }
}

impl CacheStrategy for DiskCache {
    fn name(&self) -> &'static str {
        "Disk"
    }

    fn init(&mut self, config: &dyn ConfigSource) -> Result<()> {
        let config = DiskCacheConfig::from_source(config, "/cache/disk")?;
        *self = Self::new(config)?;
        Ok(())
    }

    fn minimal_cache_time(&self) -> Duration {
        self.config.min_cache_time
    }

    fn create_key(&self, signature: &InvocationSignature) -> TagKey {
        let text = signature.compose();
        let digest = hex_digest(&text);
        let (dir, file) = digest.split_at(2);
        let storage_id = format!("{dir}/{file}");
        TagKey::with_storage_id(text, storage_id)
    }

    fn load(&self, key: &TagKey) -> Option<CachedDocument> {
        self.load_at(key, now_secs())
    }

    fn save(&self, key: &TagKey, tag: &Tag, document: &Document) -> bool {
        self.save_at(key, tag, document, now_secs())
    }

    // the directory is never scanned, so entries stays unknown (zero)
    fn usage(&self) -> StorageUsage {
        StorageUsage {
            writes: self.stored.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            key_clashes: self.key_clashes.load(Ordering::Relaxed),
            ..StorageUsage::default()
        }
    }
}

/// Overwrite the leading signature with the prefetch-marked one
fn mark_prefetched(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(&SIGNATURE_PREFETCH_MARKED.to_le_bytes())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "[Disk] Failed to remove cache file");
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(format!(".tmp.{}", Uuid::new_v4().simple()));
    PathBuf::from(name)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("Cache path {} has no parent directory", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

    let tmp = temp_path(path);
    let result = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_data()
        })
        .and_then(|()| fs::rename(&tmp, path))
        .with_context(|| format!("Failed to write cache file {}", tmp.display()));

    if result.is_err() {
        remove_quietly(&tmp);
    }
    result
}
