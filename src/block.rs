//! Blocks, cache-aware blocks and page invocation
//!
//! A [`Block`] turns a [`Request`] into one [`Document`]. A [`TaggedBlock`]
//! wraps a unit of [`TaggedWork`] with the cache: it consults the
//! coordinator first and, after real work, decides whether the fresh result
//! is worth storing. [`PageInvoker`] runs every block of a page, inline or on
//! the thread pool, and collects their documents in block order.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::coordinator::CacheCoordinator;
use crate::document::{Document, DocumentError};
use crate::invocation::InvocationContext;
use crate::key::InvocationSignature;
use crate::tag::{Tag, Timestamp, UNDEFINED_TIME, duration_secs, now_secs};
use crate::thread_pool::ThreadPool;
use crate::traits::CachedDocument;

/// Block failure, turned into an error document for the block's slot
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("{0}")]
    Failed(String),
    #[error("block produced an invalid document: {0}")]
    InvalidDocument(#[from] DocumentError),
}

/// Inbound request as seen by blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    path: String,
    args: BTreeMap<String, String>,
}

impl Request {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }
}

/// One independently invoked unit of a page
pub trait Block: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the block may run on the worker pool
    fn threaded(&self) -> bool {
        false
    }

    /// Produce this block's document
    ///
    /// # Errors
    ///
    /// Returns [`BlockError`] when the block cannot produce a document.
    fn call(&self, request: &Request) -> Result<Document, BlockError>;
}

/// A freshly computed document and its freshness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedOutput {
    pub document: Document,
    pub tag: Tag,
}

/// Work whose result can be cached under an invocation signature
pub trait TaggedWork: Send + Sync {
    fn name(&self) -> &str;

    /// Identity of the invocation for `request`
    fn signature(&self, request: &Request) -> InvocationSignature;

    /// Do the real work
    ///
    /// # Errors
    ///
    /// Returns [`BlockError`] when no document can be produced; failures are
    /// never cached.
    fn execute(&self, request: &Request) -> Result<TaggedOutput, BlockError>;
}

/// Why a cache-aware block bypassed the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The coordinator has no strategies
    NoStrategies,
    /// Caching is switched off for this block
    Disabled,
}

/// Outcome of consulting the cache before doing work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CachedDocument),
    Miss,
    Skip(SkipReason),
}

/// Cache-aware block
pub struct TaggedBlock<W> {
    work: W,
    coordinator: Arc<CacheCoordinator>,
    cache_time: Option<Duration>,
    caching: bool,
    threaded: bool,
}

impl<W: TaggedWork> TaggedBlock<W> {
    #[must_use]
    pub fn new(work: W, coordinator: Arc<CacheCoordinator>) -> Self {
        Self {
            work,
            coordinator,
            cache_time: None,
            caching: true,
            threaded: false,
        }
    }

    /// Explicit cache time, used when the work leaves the expiry open
    #[must_use]
    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    #[must_use]
    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    #[must_use]
    pub fn with_threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    /// Consult the cache for `signature`
    #[must_use]
    pub fn lookup(&self, signature: &InvocationSignature) -> CacheLookup {
        if !self.caching {
            return CacheLookup::Skip(SkipReason::Disabled);
        }
        if self.coordinator.strategy_count() == 0 {
            return CacheLookup::Skip(SkipReason::NoStrategies);
        }
        match self.coordinator.load(signature) {
            Some(cached) => CacheLookup::Hit(cached),
            None => CacheLookup::Miss,
        }
    }

    /// Decide whether a fresh result is stored, at `now`
    ///
    /// 1. open expiry with a known modification time is always stored;
    /// 2. an explicit cache time at least the coordinator's minimum is stored,
    ///    filling an open expiry with `now + cache_time`;
    /// 3. otherwise the remaining lifetime must reach the minimum.
    pub fn should_store_at(&self, tag: &mut Tag, now: Timestamp) -> bool {
        let minimal = self.coordinator.minimal_cache_time();

        if tag.expire_time == UNDEFINED_TIME && tag.has_last_modified() {
            return true;
        }

        if let Some(cache_time) = self.cache_time {
            if cache_time >= minimal {
                if tag.expire_time == UNDEFINED_TIME {
                    tag.expire_time = now.saturating_add(duration_secs(cache_time));
                }
                return true;
            }
        }

        tag.time_to_live_at(now)
            .is_some_and(|left| left >= duration_secs(minimal))
    }

    fn compute_and_store(
        &self,
        request: &Request,
        signature: &InvocationSignature,
    ) -> Result<Document, BlockError> {
        let TaggedOutput { document, mut tag } = self.work.execute(request)?;
        if self.should_store_at(&mut tag, now_secs()) {
            self.coordinator.save(signature, &tag, &document);
        } else {
            debug!(block = self.work.name(), "Result not eligible for caching");
        }
        Ok(document)
    }
}

impl<W: TaggedWork> Block for TaggedBlock<W> {
    fn name(&self) -> &str {
        self.work.name()
    }

    fn threaded(&self) -> bool {
        self.threaded
    }

    fn call(&self, request: &Request) -> Result<Document, BlockError> {
        let signature = self.work.signature(request);
        match self.lookup(&signature) {
            CacheLookup::Hit(cached) => return Ok(cached.document),
            CacheLookup::Skip(reason) => {
                debug!(block = self.work.name(), ?reason, "Skipping cache");
                return self.work.execute(request).map(|output| output.document);
            }
            CacheLookup::Miss => {}
        }

        self.coordinator.coalesce(&signature, |contended| {
            if contended {
                if let Some(cached) = self.coordinator.load(&signature) {
                    return Ok(cached.document);
                }
            }
            self.compute_and_store(request, &signature)
        })
    }
}

/// Runs the blocks of one page and collects their documents
pub struct PageInvoker {
    pool: Arc<ThreadPool>,
    timeout: Duration,
}

impl PageInvoker {
    #[must_use]
    pub fn new(pool: Arc<ThreadPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every block and return one document per block, in block order
    ///
    /// Threaded blocks go to the pool, the rest run on this thread. Blocks
    /// still running when the timeout passes get a timeout document.
    pub fn invoke(&self, blocks: &[Arc<dyn Block>], request: &Arc<Request>) -> Vec<Document> {
        let context = Arc::new(InvocationContext::new());
        let labels = blocks.iter().map(|block| block.name().to_string()).collect();
        if let Err(e) = context.expect_labeled(labels) {
            error!(error = %e, "Fresh invocation context rejected slots");
            return blocks
                .iter()
                .map(|block| Document::error(block.name(), &e.to_string()))
                .collect();
        }

        for (slot, block) in blocks.iter().enumerate() {
            let task = slot_task(
                slot,
                Arc::clone(block),
                Arc::clone(request),
                Arc::clone(&context),
            );
            if block.threaded() {
                self.pool.invoke(task);
            } else {
                task();
            }
        }

        context.wait(self.timeout);

        context
            .results()
            .into_iter()
            .zip(blocks)
            .map(|(document, block)| document.unwrap_or_else(|| Document::timed_out(block.name())))
            .collect()
    }
}

fn slot_task(
    slot: usize,
    block: Arc<dyn Block>,
    request: Arc<Request>,
    context: Arc<InvocationContext>,
) -> impl FnOnce() + Send + 'static {
    move || {
        let document = match panic::catch_unwind(AssertUnwindSafe(|| block.call(&request))) {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                warn!(block = block.name(), error = %e, "Block failed");
                Document::error(block.name(), &e.to_string())
            }
            Err(_) => {
                error!(block = block.name(), "Block panicked");
                Document::error(block.name(), "block panicked")
            }
        };
        if let Err(e) = context.result(slot, document) {
            error!(block = block.name(), slot, error = %e, "Block result rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryCache, MemoryCacheConfig};
    use std::sync::atomic::{AtomicU64, Ordering};

    const NOW: Timestamp = 1_700_000_000;

    struct Counter {
        runs: AtomicU64,
        tag: Tag,
    }

    impl Counter {
        fn new(tag: Tag) -> Self {
            Self {
                runs: AtomicU64::new(0),
                tag,
            }
        }
    }

    impl TaggedWork for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn signature(&self, request: &Request) -> InvocationSignature {
            InvocationSignature::new("counter").with_param(request.arg("id").unwrap_or_default())
        }

        fn execute(&self, _request: &Request) -> Result<TaggedOutput, BlockError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TaggedOutput {
                document: Document::parse(format!("<run n=\"{run}\"/>"))?,
                tag: self.tag,
            })
        }
    }

    fn coordinator(min_cache_time: u64) -> Arc<CacheCoordinator> {
        Arc::new(
            CacheCoordinator::new().with_strategy(Box::new(MemoryCache::new(MemoryCacheConfig {
                min_cache_time: Duration::from_secs(min_cache_time),
                ..MemoryCacheConfig::default()
            }))),
        )
    }

    #[test]
    fn test_open_expiry_with_last_modified_is_stored() {
        let block = TaggedBlock::new(Counter::new(Tag::default()), coordinator(5));
        let mut tag = Tag::new(NOW - 100, UNDEFINED_TIME);
        assert!(block.should_store_at(&mut tag, NOW));
        assert_eq!(tag.expire_time, UNDEFINED_TIME);
    }

    #[test]
    fn test_explicit_cache_time_fills_expiry() {
        let block = TaggedBlock::new(Counter::new(Tag::default()), coordinator(5))
            .with_cache_time(Duration::from_secs(30));
        let mut tag = Tag::new(UNDEFINED_TIME, UNDEFINED_TIME);
        assert!(block.should_store_at(&mut tag, NOW));
        assert_eq!(tag.expire_time, NOW + 30);
    }

    #[test]
    fn test_short_cache_time_falls_back_to_remaining_lifetime() {
        let block = TaggedBlock::new(Counter::new(Tag::default()), coordinator(10))
            .with_cache_time(Duration::from_secs(2));
        assert!(!block.should_store_at(&mut Tag::new(UNDEFINED_TIME, NOW + 9), NOW));
        assert!(block.should_store_at(&mut Tag::new(UNDEFINED_TIME, NOW + 10), NOW));
        assert!(!block.should_store_at(&mut Tag::new(UNDEFINED_TIME, UNDEFINED_TIME), NOW));
    }

    #[test]
    fn test_miss_then_hit() {
        let now = now_secs();
        let work = Counter::new(Tag::new(UNDEFINED_TIME, now + 600));
        let block = TaggedBlock::new(work, coordinator(5));
        let request = Request::new("/page").with_arg("id", "7");

        let first = block.call(&request).unwrap();
        let second = block.call(&request).unwrap();
        assert_eq!(first, second);
        assert_eq!(block.work.runs.load(Ordering::SeqCst), 1);

        let other = block.call(&Request::new("/page").with_arg("id", "8")).unwrap();
        assert_ne!(other, first);
    }

    #[test]
    fn test_ineligible_result_is_not_cached() {
        let now = now_secs();
        let block = TaggedBlock::new(Counter::new(Tag::new(UNDEFINED_TIME, now + 2)), coordinator(60));
        let request = Request::new("/page");
        block.call(&request).unwrap();
        block.call(&request).unwrap();
        assert_eq!(block.work.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lookup_skips() {
        let block = TaggedBlock::new(Counter::new(Tag::default()), Arc::new(CacheCoordinator::new()));
        let sig = InvocationSignature::new("counter");
        assert_eq!(block.lookup(&sig), CacheLookup::Skip(SkipReason::NoStrategies));

        let block = TaggedBlock::new(Counter::new(Tag::default()), coordinator(5)).with_caching(false);
        assert_eq!(block.lookup(&sig), CacheLookup::Skip(SkipReason::Disabled));
    }
}
