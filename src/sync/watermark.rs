//! Atomic monotonic pulse-id watermarks
//!
//! Producers and consumers race to move the watermarks; every update is a
//! compare-and-swap that only ever moves the value in one direction, so a
//! stale writer can never undo a newer one.

use std::sync::atomic::{AtomicI64, Ordering};

/// Sentinel values for unset watermarks
pub mod special {
    /// No pulse has been delivered or deleted yet
    pub const NOTHING_RESOLVED: i64 = i64::MIN;
    /// No pulse has been received yet
    pub const NOTHING_RECEIVED: i64 = i64::MAX;
}

/// Pulse-id that only moves in one direction
#[derive(Debug)]
pub struct AtomicWatermark {
    value: AtomicI64,
}

impl AtomicWatermark {
    /// Create a watermark with an initial value
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Load the current value with acquire ordering
    pub fn load(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Raise to `candidate` if it is larger than the current value
    ///
    /// Returns true if this call moved the watermark.
    pub fn raise_to(&self, candidate: i64) -> bool {
        let mut current = self.load();
        while current < candidate {
            match self.value.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Move from exactly `observed` to a larger `candidate`.
    ///
    /// Fails if any other update happened since `observed` was read.
    pub fn advance_from(&self, observed: i64, candidate: i64) -> bool {
        candidate > observed
            && self
                .value
                .compare_exchange(observed, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Lower to `candidate` if it is smaller than the current value
    ///
    /// Returns true if this call moved the watermark.
    pub fn lower_to(&self, candidate: i64) -> bool {
        let mut current = self.load();
        while current > candidate {
            match self.value.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}
