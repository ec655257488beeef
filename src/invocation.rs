//! Per-page invocation context
//!
//! An [`InvocationContext`] collects one result document per block into a
//! fixed slot vector. Blocks write their slot exactly once from whichever
//! thread ran them; the page thread waits, bounded by a deadline, until every
//! slot is filled.
//!
//! ```text
//! created -> expect(N) -> filling -> all filled | timed out -> stopped
//! ```

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::document::Document;

/// Misuse of an [`InvocationContext`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("context already expects {0} results")]
    AlreadyExpecting(usize),
    #[error("context is stopped")]
    Stopped,
    #[error("slot {slot} out of range for {slots} slots")]
    SlotOutOfRange { slot: usize, slots: usize },
}

/// How [`InvocationContext::wait`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every block delivered its result
    Completed,
    /// The deadline passed; `missing` slots got a timeout document
    TimedOut { missing: usize },
}

#[derive(Default)]
struct ContextState {
    slots: Vec<Option<Document>>,
    labels: Vec<String>,
    filled: usize,
    expecting: bool,
    stopped: bool,
}

/// Result slots for one page invocation
#[derive(Default)]
pub struct InvocationContext {
    state: Mutex<ContextState>,
    filled_cv: Condvar,
}

impl InvocationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `count` anonymous slots
    ///
    /// # Errors
    ///
    /// Fails if slots were already allocated or the context is stopped.
    pub fn expect(&self, count: usize) -> Result<(), InvocationError> {
        self.expect_labeled((0..count).map(|slot| format!("slot-{slot}")).collect())
    }

    /// Allocate one slot per label; labels name the block in timeout documents
    ///
    /// # Errors
    ///
    /// Fails if slots were already allocated or the context is stopped.
    pub fn expect_labeled(&self, labels: Vec<String>) -> Result<(), InvocationError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(InvocationError::Stopped);
        }
        if state.expecting {
            return Err(InvocationError::AlreadyExpecting(state.slots.len()));
        }
        state.slots = vec![None; labels.len()];
        state.labels = labels;
        state.expecting = true;
        Ok(())
    }

    /// Fill `slot` with `document`
    ///
    /// Returns `Ok(false)` without storing when the context is stopped or the
    /// slot already holds a result.
    ///
    /// # Errors
    ///
    /// Fails if `slot` is not one of the expected slots.
    pub fn result(&self, slot: usize, document: Document) -> Result<bool, InvocationError> {
        let mut state = self.state.lock();
        let slots = state.slots.len();
        if state.stopped {
            debug!(slot, "Dropping result for stopped context");
            return Ok(false);
        }
        let Some(entry) = state.slots.get_mut(slot) else {
            return Err(InvocationError::SlotOutOfRange { slot, slots });
        };
        if entry.is_some() {
            return Ok(false);
        }
        *entry = Some(document);
        state.filled += 1;
        if state.filled == slots {
            self.filled_cv.notify_all();
        }
        Ok(true)
    }

    /// Block until every slot is filled or `timeout` elapses, then stop
    ///
    /// On timeout each empty slot receives a timeout document, so after this
    /// returns no slot is empty.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        // a deadline past the clock's range waits without limit
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.filled < state.slots.len() && !state.stopped {
            match deadline {
                Some(deadline) => {
                    if self.filled_cv.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.filled_cv.wait(&mut state),
            }
        }

        let ContextState { slots, labels, .. } = &mut *state;
        let mut missing = 0;
        for (slot, label) in slots.iter_mut().zip(labels.iter()) {
            if slot.is_none() {
                *slot = Some(Document::timed_out(label));
                missing += 1;
            }
        }
        state.filled = state.slots.len();
        state.stopped = true;

        if missing == 0 {
            WaitOutcome::Completed
        } else {
            warn!(
                missing,
                slots = state.slots.len(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Invocation timed out"
            );
            WaitOutcome::TimedOut { missing }
        }
    }

    /// Stop accepting results and release any waiter
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.filled_cv.notify_all();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of expected slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every slot, `None` where no result has arrived
    #[must_use]
    pub fn results(&self) -> Vec<Option<Document>> {
        self.state.lock().slots.clone()
    }
}
