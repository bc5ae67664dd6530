//! CompleteAll policy, lock-based realization
//!
//! Same delivery rules as the lock-free variant; the buffer and a bounded
//! queue of resolved pulses live under a single short-held mutex and waiting
//! consumers sleep on a condition variable.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use log::{info, trace};
use parking_lot::{Condvar, Mutex};

use super::core::{FirstMessageCallback, HeadState, SynchronizerCore};
use super::MessageSynchronizer;
use crate::channel::ChannelSchedule;
use crate::config::SyncConfig;
use crate::error::{EvictionCause, Result};
use crate::record::{Pulse, PulseRecord, Stored};
use crate::stats::StatsSnapshot;

struct State<M> {
    buffer: BTreeMap<i64, PulseRecord<M>>,
    delivery: VecDeque<Pulse<M>>,
}

/// Strictly ordered synchronizer guarded by one mutex
pub struct LockedCompleteAllSynchronizer<M> {
    core: SynchronizerCore<M>,
    state: Mutex<State<M>>,
    ready: Condvar,
}

impl<M: Send + 'static> LockedCompleteAllSynchronizer<M> {
    /// Create a synchronizer for `channels`
    pub fn new<C, P>(
        channels: Vec<ChannelSchedule>,
        config: SyncConfig,
        channel_of: C,
        pulse_id_of: P,
    ) -> Result<Self>
    where
        C: for<'a> Fn(&'a M) -> &'a str + Send + Sync + 'static,
        P: Fn(&M) -> i64 + Send + Sync + 'static,
    {
        let core = SynchronizerCore::new(channels, config, channel_of, pulse_id_of)?;
        let capacity = core.config().delivery_queue_capacity;
        Ok(Self {
            core,
            state: Mutex::new(State {
                buffer: BTreeMap::new(),
                delivery: VecDeque::with_capacity(capacity),
            }),
            ready: Condvar::new(),
        })
    }

    /// Shared bookkeeping
    pub fn core(&self) -> &SynchronizerCore<M> {
        &self.core
    }

    /// Buffer one message; only holds the lock for map updates
    pub fn add_message(&self, message: M) {
        // Admission runs unlocked so the first-message callback cannot
        // re-enter the mutex.
        let (channel, pulse_id) = match self.core.admit(&message) {
            Ok(admitted) => (admitted.channel, admitted.pulse_id),
            Err(_) => return,
        };
        self.core.accept(pulse_id);

        let mut state = self.state.lock();
        if pulse_id <= self.core.last_resolved() {
            self.core.discard_stale(pulse_id);
            return;
        }

        let mut created = false;
        let record = state.buffer.entry(pulse_id).or_insert_with(|| {
            created = true;
            PulseRecord::new(pulse_id)
        });
        if let Stored::Replaced(_) = record.insert(channel, message) {
            self.core.record_overwrite(channel, pulse_id);
        }
        if pulse_id <= self.core.shed_through() && !self.core.is_record_complete(record) {
            state.buffer.remove(&pulse_id);
            self.core.discard_stale(pulse_id);
            return;
        }

        let queued = state.delivery.len();
        self.drain(&mut state);
        let timed = created && self.core.config().send_timeout.is_some();
        if state.delivery.len() > queued || timed {
            self.ready.notify_all();
        }
    }

    /// Block until a pulse is resolved for delivery or the synchronizer closes
    pub fn next_message(&self) -> Option<Pulse<M>> {
        let mut state = self.state.lock();
        loop {
            if self.core.is_closed() {
                return None;
            }

            let wait = self.drain(&mut state);
            if let Some(pulse) = state.delivery.pop_front() {
                return Some(pulse);
            }

            match wait {
                Some(timeout) => {
                    trace!("Consumer waiting up to {:?} for the head to time out", timeout);
                    let _ = self.ready.wait_for(&mut state, timeout);
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Resolve a pulse if one is ready, without blocking
    pub fn try_next_message(&self) -> Option<Pulse<M>> {
        let mut state = self.state.lock();
        if self.core.is_closed() {
            return None;
        }
        self.drain(&mut state);
        state.delivery.pop_front()
    }

    /// Release every waiting consumer; later calls return end-of-stream
    pub fn close(&self) {
        if self.core.close() {
            let state = self.state.lock();
            info!(
                "Closing locked CompleteAll synchronizer with {} buffered and {} queued pulse(s)",
                state.buffer.len(),
                state.delivery.len()
            );
            self.ready.notify_all();
        }
    }

    /// Number of buffered pulse records
    pub fn buffer_size(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Resolve buffered heads into the delivery queue.
    ///
    /// Returns how long the current head may still wait before it times out.
    /// While the delivery queue is full no head is resolved and the bound is
    /// kept by shedding incomplete records instead.
    fn drain(&self, state: &mut State<M>) -> Option<Duration> {
        let capacity = self.core.config().delivery_queue_capacity;
        loop {
            if state.delivery.len() >= capacity {
                self.shed_overflow(state);
                return None;
            }

            let head = match state.buffer.keys().next() {
                Some(&pulse_id) => pulse_id,
                None => return None,
            };

            if self.core.config().send_first_complete && !self.core.delivered_any() {
                let first_complete = state
                    .buffer
                    .values()
                    .find(|record| self.core.is_record_complete(record))
                    .map(PulseRecord::pulse_id);
                if let Some(first_complete) = first_complete {
                    if self.core.should_skip_to_first_complete(head, first_complete) {
                        let kept = state.buffer.split_off(&first_complete);
                        let skipped = std::mem::replace(&mut state.buffer, kept);
                        for &pulse_id in skipped.keys() {
                            self.core.record_skipped(pulse_id);
                        }
                        self.core.skip_to_first_complete(first_complete, skipped.len());
                        continue;
                    }
                }
            }

            let watermark = self.core.last_resolved();
            let buffered = state.buffer.len();
            let cause = match state.buffer.get(&head) {
                Some(record) => {
                    let age = record.age(Instant::now());
                    match self.core.head_state(record, watermark, buffered, age, true) {
                        HeadState::Pending(timeout) => return timeout,
                        HeadState::Complete => None,
                        HeadState::Evict(cause) => Some(cause),
                    }
                }
                None => return None,
            };

            let record = match state.buffer.remove(&head) {
                Some(record) => record,
                None => return None,
            };
            if !self.core.advance_watermark(watermark, head) {
                self.core.discard_stale(head);
                continue;
            }
            if let Some(pulse) = self.core.resolve(&record, cause) {
                state.delivery.push_back(pulse);
            }
        }
    }

    /// Drop incomplete records, oldest first, until the buffer is within bound.
    ///
    /// Complete records are passed over; they stay for in-order delivery.
    fn shed_overflow(&self, state: &mut State<M>) {
        let config = self.core.config();
        let bound = match config.max_buffered_records {
            Some(bound) if !config.send_incomplete_messages => bound,
            _ => return,
        };

        let excess = state.buffer.len().saturating_sub(bound);
        let victims: Vec<i64> = state
            .buffer
            .values()
            .filter(|record| !self.core.is_record_complete(record))
            .map(PulseRecord::pulse_id)
            .take(excess)
            .collect();

        for pulse_id in victims {
            if let Some(record) = state.buffer.remove(&pulse_id) {
                self.core.record_shed(pulse_id);
                let _ = self.core.resolve(&record, Some(EvictionCause::Capacity));
            }
        }
    }
}

impl<M: Send + 'static> MessageSynchronizer<M> for LockedCompleteAllSynchronizer<M> {
    fn add_message(&self, message: M) {
        LockedCompleteAllSynchronizer::add_message(self, message)
    }

    fn next_message(&self) -> Option<Pulse<M>> {
        LockedCompleteAllSynchronizer::next_message(self)
    }

    fn try_next_message(&self) -> Option<Pulse<M>> {
        LockedCompleteAllSynchronizer::try_next_message(self)
    }

    fn on_first_message(&self, callback: FirstMessageCallback) {
        self.core.on_first_message(callback)
    }

    fn channels(&self) -> &[ChannelSchedule] {
        self.core.channels()
    }

    fn buffer_size(&self) -> usize {
        LockedCompleteAllSynchronizer::buffer_size(self)
    }

    fn close(&self) {
        LockedCompleteAllSynchronizer::close(self)
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }
}
