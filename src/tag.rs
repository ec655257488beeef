//! Tag - Freshness Metadata
//!
//! A [`Tag`] travels with every cached document and records when the
//! underlying data was last modified and when the cached copy stops being
//! valid. Times are Unix seconds; [`UNDEFINED_TIME`] marks "unknown / never".

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix time in whole seconds
pub type Timestamp = i64;

/// Sentinel for an unknown or absent point in time
pub const UNDEFINED_TIME: Timestamp = 0;

/// Current Unix time in seconds
#[must_use]
pub fn now_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(UNDEFINED_TIME)
}

/// Convert a duration to whole seconds, saturating
#[must_use]
pub fn duration_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Freshness metadata attached to a cached result
///
/// Tags are produced by cache-aware blocks after real work completes and are
/// never mutated once handed to a cache strategy.
///
/// The key an entry is stored under travels beside the tag as a
/// [`TagKey`](crate::key::TagKey), not inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Whether the producer reported new content (as opposed to "not modified")
    pub modified: bool,
    /// Last modification time of the source data
    pub last_modified: Timestamp,
    /// Absolute expiry time of the cached copy
    pub expire_time: Timestamp,
}

impl Default for Tag {
    fn default() -> Self {
        Self {
            modified: true,
            last_modified: UNDEFINED_TIME,
            expire_time: UNDEFINED_TIME,
        }
    }
}

impl Tag {
    /// Tag with both times set
    #[must_use]
    pub fn new(last_modified: Timestamp, expire_time: Timestamp) -> Self {
        Self {
            modified: true,
            last_modified,
            expire_time,
        }
    }

    /// Tag expiring `ttl` after `now`
    #[must_use]
    pub fn expiring_in(now: Timestamp, ttl: Duration) -> Self {
        Self::new(UNDEFINED_TIME, now.saturating_add(duration_secs(ttl)))
    }

    /// Tag that never expires on its own
    #[must_use]
    pub fn non_expiring() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_expire_time(&self) -> bool {
        self.expire_time != UNDEFINED_TIME
    }

    #[must_use]
    pub fn has_last_modified(&self) -> bool {
        self.last_modified != UNDEFINED_TIME
    }

    /// Whether the tag is expired at the current wall-clock time
    #[must_use]
    pub fn expired(&self) -> bool {
        self.expired_at(now_secs())
    }

    /// Whether the tag is expired at `now`
    #[must_use]
    pub fn expired_at(&self, now: Timestamp) -> bool {
        self.has_expire_time() && self.expire_time <= now
    }

    /// Seconds left until expiry at `now`, `None` when the tag never expires
    #[must_use]
    pub fn time_to_live_at(&self, now: Timestamp) -> Option<i64> {
        self.has_expire_time()
            .then(|| self.expire_time.saturating_sub(now))
    }
}
