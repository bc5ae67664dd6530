//! CompleteAll policy, lock-free realization
//!
//! Pulses are resolved strictly in ascending pulse-id order. The head of the
//! buffer is delivered once every expected channel reported and no earlier
//! scheduled pulse can still be missing; it is evicted earlier when it times
//! out or the buffer overflows.

use super::core::{HeadState, SynchronizerCore};
use super::lock_free::{HeadRule, HeadView, LockFreeSynchronizer};

/// Strictly ordered synchronizer built on a concurrent skip list
pub type CompleteAllSynchronizer<M> = LockFreeSynchronizer<M, CompleteAllRule>;

/// Deliver the head once it is complete and gap-free
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteAllRule;

impl HeadRule for CompleteAllRule {
    const NAME: &'static str = "CompleteAll";
    const SKIPS_TO_FIRST_COMPLETE: bool = true;

    fn judge<M>(core: &SynchronizerCore<M>, head: &HeadView<'_, M>) -> HeadState {
        core.head_state(head.record, head.watermark, head.buffered, head.age, true)
    }
}
