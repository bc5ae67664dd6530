//! CompleteLatest policy, lock-free
//!
//! Trades ordering for latency: as soon as a pulse newer than the buffered
//! head is complete, every older buffered pulse is resolved as superseded
//! (delivered partially only when incomplete sends are enabled) and the
//! complete one follows. Gaps are not waited for. Delivered pulse-ids never
//! repeat and always lie above the watermark at the time of delivery.

use super::core::{HeadState, SynchronizerCore};
use super::lock_free::{HeadRule, HeadView, LockFreeSynchronizer};
use crate::error::EvictionCause;

/// Latency-first synchronizer
pub type CompleteLatestSynchronizer<M> = LockFreeSynchronizer<M, CompleteLatestRule>;

/// Abandon the head as soon as a newer pulse is complete
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteLatestRule;

impl HeadRule for CompleteLatestRule {
    const NAME: &'static str = "CompleteLatest";
    const SKIPS_TO_FIRST_COMPLETE: bool = false;

    fn judge<M>(core: &SynchronizerCore<M>, head: &HeadView<'_, M>) -> HeadState {
        match core.head_state(head.record, head.watermark, head.buffered, head.age, false) {
            HeadState::Pending(timeout) => match head.first_complete {
                Some(newest) if newest > head.record.pulse_id() => {
                    HeadState::Evict(EvictionCause::Superseded)
                }
                _ => HeadState::Pending(timeout),
            },
            decided => decided,
        }
    }
}
