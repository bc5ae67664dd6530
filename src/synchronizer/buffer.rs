//! Lock-free ordered buffer of pending pulse records

use std::sync::Arc;

use crossbeam_skiplist::{SkipMap, SkipSet};

use super::core::SynchronizerCore;
use crate::error::EvictionCause;
use crate::record::{PulseRecord, Stored};

/// Result of buffering one message
pub(crate) struct Buffered<M> {
    pub record: Arc<PulseRecord<M>>,
    /// The message opened a new record
    pub created: bool,
}

/// Concurrent pulse-id → record map iterated in ascending pulse order
pub(crate) struct PulseBuffer<M> {
    records: SkipMap<i64, Arc<PulseRecord<M>>>,
}

impl<M: Send + 'static> PulseBuffer<M> {
    pub fn new() -> Self {
        Self {
            records: SkipMap::new(),
        }
    }

    /// Store `message` into the record of `pulse_id`, creating it on first arrival.
    ///
    /// Returns `None` if the pulse was resolved or shed while the message was
    /// being stored; a record left behind is removed again.
    pub fn insert(
        &self,
        core: &SynchronizerCore<M>,
        channel: &str,
        pulse_id: i64,
        message: M,
    ) -> Option<Buffered<M>> {
        let mut created = false;
        let record = self
            .records
            .get_or_insert_with(pulse_id, || {
                created = true;
                Arc::new(PulseRecord::new(pulse_id))
            })
            .value()
            .clone();

        match record.insert(channel, message) {
            Stored::Added => {}
            Stored::Replaced(_) => core.record_overwrite(channel, pulse_id),
            Stored::Claimed => {
                core.discard_stale(pulse_id);
                return None;
            }
        }

        let stale = pulse_id <= core.last_resolved()
            || (pulse_id <= core.shed_through()
                && record.try_shed(core.expected_channel_count(pulse_id)));
        if stale {
            self.remove(pulse_id, &record);
            core.discard_stale(pulse_id);
            return None;
        }

        Some(Buffered { record, created })
    }

    /// Oldest buffered record
    pub fn head(&self) -> Option<(i64, Arc<PulseRecord<M>>)> {
        self.records
            .front()
            .map(|entry| (*entry.key(), entry.value().clone()))
    }

    /// Remove exactly `record`; a different record under the same key stays
    pub fn remove(&self, pulse_id: i64, record: &Arc<PulseRecord<M>>) -> bool {
        match self.records.get(&pulse_id) {
            Some(entry) if Arc::ptr_eq(entry.value(), record) => entry.remove(),
            _ => false,
        }
    }

    /// Remove whatever is buffered under a pulse-id at or below the watermark
    pub fn discard(&self, core: &SynchronizerCore<M>, pulse_id: i64) {
        if let Some(entry) = self.records.remove(&pulse_id) {
            if !entry.value().is_claimed() {
                core.discard_stale(pulse_id);
            }
        }
    }

    /// Drop every unclaimed record older than `pulse_id`, returning how many this call removed
    pub fn purge_below(&self, core: &SynchronizerCore<M>, pulse_id: i64) -> usize {
        let mut purged = 0;
        for entry in self.records.range(..pulse_id) {
            if entry.value().try_claim() {
                entry.remove();
                core.record_skipped(*entry.key());
                purged += 1;
            }
        }
        purged
    }

    /// Shed incomplete records, oldest first, while the buffer exceeds its bound.
    ///
    /// Only used when evicted records are not delivered, so nothing is lost
    /// to consumers. Complete records are passed over and stay buffered until
    /// a consumer resolves them in order.
    pub fn shed_overflow(&self, core: &SynchronizerCore<M>, flagged: &SkipSet<i64>) {
        for entry in self.records.iter() {
            if !core.config().over_capacity(self.len()) {
                return;
            }

            let pulse_id = *entry.key();
            let record = entry.value();
            if pulse_id <= core.last_resolved()
                || !record.try_shed(core.expected_channel_count(pulse_id))
            {
                continue;
            }

            core.record_shed(pulse_id);
            entry.remove();
            flagged.remove(&pulse_id);
            let _ = core.resolve(record, Some(EvictionCause::Capacity));
        }
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.records.len()
    }
}
