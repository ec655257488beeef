//! Prefetch Calculator
//!
//! Decides when a cached entry that has not expired yet should nevertheless
//! be reported stale, so that exactly one caller refreshes it ahead of the
//! real expiry instead of every caller at once.
//!
//! The refresh window grows with the entry's cache time: entries cached for
//! a minute or longer get a fixed window of [`MAX_PREFETCH_THRESHOLD`],
//! shorter ones scale linearly down towards [`MIN_PREFETCH_THRESHOLD`].

use crate::tag::{Tag, Timestamp, UNDEFINED_TIME, now_secs};

/// Smallest refresh window, in seconds
pub const MIN_PREFETCH_THRESHOLD: i64 = 1;

/// Largest refresh window, in seconds
pub const MAX_PREFETCH_THRESHOLD: i64 = 5;

/// Cache time at which the window reaches its maximum, in seconds
pub const PREFETCH_SATURATION_TIME: i64 = 60;

/// Whether `tag`, stored at `stored_time`, is due for an early refresh now
#[must_use]
pub fn need_prefetch(tag: &Tag, stored_time: Timestamp) -> bool {
    need_prefetch_at(tag, stored_time, now_secs())
}

/// Whether `tag`, stored at `stored_time`, is due for an early refresh at `now`
///
/// `stored_time` may be [`UNDEFINED_TIME`]; the tag's `last_modified` then
/// stands in for it, and without either only the minimal window applies.
#[must_use]
pub fn need_prefetch_at(tag: &Tag, stored_time: Timestamp, now: Timestamp) -> bool {
    if !tag.has_expire_time() {
        return false;
    }
    if now >= tag.expire_time {
        return true;
    }

    let left = tag.expire_time - now;

    let reference = if stored_time != UNDEFINED_TIME {
        stored_time
    } else if tag.has_last_modified() {
        tag.last_modified
    } else {
        return left <= MIN_PREFETCH_THRESHOLD;
    };

    let cache_time = tag.expire_time.saturating_sub(reference);
    if cache_time >= PREFETCH_SATURATION_TIME {
        return left <= MAX_PREFETCH_THRESHOLD;
    }

    #[allow(clippy::cast_precision_loss)]
    let within = {
        let span = (MAX_PREFETCH_THRESHOLD - MIN_PREFETCH_THRESHOLD) as f64;
        let threshold = MIN_PREFETCH_THRESHOLD as f64
            + span * cache_time.max(0) as f64 / PREFETCH_SATURATION_TIME as f64;
        (left as f64) <= threshold
    };
    within
}
