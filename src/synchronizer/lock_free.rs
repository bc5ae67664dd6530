//! Lock-free driver shared by the skip-list based policies
//!
//! Producers never block: they buffer the message, flag complete pulses and
//! broadcast to parked consumers. Consumers read the watermark, judge the
//! buffered head against it through the policy's [`HeadRule`] and claim the
//! head by moving the watermark from exactly the value they judged against.
//! The record is unlinked only after that move, so a decision is never
//! applied to a stream that has moved on. When nothing can be resolved a
//! consumer parks with a deadline derived from the head's age.

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use crossbeam_skiplist::SkipSet;
use log::{info, trace};

use super::buffer::PulseBuffer;
use super::core::{FirstMessageCallback, HeadState, SynchronizerCore};
use super::MessageSynchronizer;
use crate::channel::ChannelSchedule;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::record::{Pulse, PulseRecord};
use crate::stats::StatsSnapshot;
use crate::sync::{LockFreeWaitRing, WaitStats};

/// Buffered head as seen by a [`HeadRule`]
pub struct HeadView<'a, M> {
    pub record: &'a PulseRecord<M>,
    /// Watermark the head is judged against
    pub watermark: i64,
    /// Number of buffered records
    pub buffered: usize,
    /// Time since the head's first message arrived
    pub age: Duration,
    /// Oldest complete pulse above the watermark
    pub first_complete: Option<i64>,
}

/// Delivery decision of a lock-free policy
pub trait HeadRule: Send + Sync + 'static {
    /// Policy name used in logs
    const NAME: &'static str;

    /// Whether startup drops pulses older than the first complete one
    const SKIPS_TO_FIRST_COMPLETE: bool;

    /// Decide the fate of the oldest buffered pulse
    fn judge<M>(core: &SynchronizerCore<M>, head: &HeadView<'_, M>) -> HeadState;
}

enum Poll<M> {
    Ready(Pulse<M>),
    Wait(Option<Duration>),
}

/// Synchronizer built on a concurrent skip list, parameterised by its policy
pub struct LockFreeSynchronizer<M, R> {
    core: SynchronizerCore<M>,
    buffer: PulseBuffer<M>,
    /// Pulse-ids whose record holds every expected channel
    complete: SkipSet<i64>,
    waiters: LockFreeWaitRing,
    _rule: PhantomData<fn() -> R>,
}

impl<M: Send + 'static, R: HeadRule> LockFreeSynchronizer<M, R> {
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
        Ok(Self {
            core: SynchronizerCore::new(channels, config, channel_of, pulse_id_of)?,
            buffer: PulseBuffer::new(),
            complete: SkipSet::new(),
            waiters: LockFreeWaitRing::new(),
            _rule: PhantomData,
        })
    }

    /// Shared bookkeeping
    pub fn core(&self) -> &SynchronizerCore<M> {
        &self.core
    }

    /// Parking statistics of the consumers
    pub fn wait_stats(&self) -> WaitStats {
        self.waiters.stats()
    }

    /// Buffer one message; never blocks
    pub fn add_message(&self, message: M) {
        let (channel, pulse_id) = match self.core.admit(&message) {
            Ok(admitted) => (admitted.channel, admitted.pulse_id),
            Err(_) => return,
        };
        self.core.accept(pulse_id);

        let buffered = match self.buffer.insert(&self.core, channel, pulse_id, message) {
            Some(buffered) => buffered,
            None => return,
        };

        let complete = self.core.is_record_complete(&buffered.record);
        if complete {
            self.complete.insert(pulse_id);
        }

        let over_capacity = self.core.config().over_capacity(self.buffer.len());
        if over_capacity && !self.core.config().send_incomplete_messages {
            self.buffer.shed_overflow(&self.core, &self.complete);
        }
        let timed = buffered.created && self.core.config().send_timeout.is_some();
        if complete || over_capacity || timed {
            self.waiters.unpark_all();
        }
    }

    /// Block until a pulse is resolved for delivery or the synchronizer closes
    pub fn next_message(&self) -> Option<Pulse<M>> {
        loop {
            if self.core.is_closed() {
                return None;
            }

            let registration = self.waiters.register();
            match self.poll() {
                Poll::Ready(pulse) => return Some(pulse),
                Poll::Wait(timeout) => {
                    if self.core.is_closed() {
                        return None;
                    }
                    trace!("Consumer parking for {:?}", timeout);
                    registration.park(timeout);
                }
            }
        }
    }

    /// Resolve a pulse if one is ready, without blocking
    pub fn try_next_message(&self) -> Option<Pulse<M>> {
        if self.core.is_closed() {
            return None;
        }
        match self.poll() {
            Poll::Ready(pulse) => Some(pulse),
            Poll::Wait(_) => None,
        }
    }

    /// Release every waiting consumer; later calls return end-of-stream
    pub fn close(&self) {
        if self.core.close() {
            info!(
                "Closing {} synchronizer with {} buffered pulse(s)",
                R::NAME,
                self.buffer.len()
            );
            self.waiters.unpark_all();
        }
    }

    /// Number of buffered pulse records
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    fn poll(&self) -> Poll<M> {
        loop {
            let watermark = self.core.last_resolved();
            let (pulse_id, record) = match self.buffer.head() {
                Some(head) => head,
                None => return Poll::Wait(None),
            };

            if pulse_id <= watermark {
                self.buffer.discard(&self.core, pulse_id);
                self.complete.remove(&pulse_id);
                continue;
            }

            // Leftover of a shed pulse re-opened by late data
            if pulse_id <= self.core.shed_through()
                && record.try_shed(self.core.expected_channel_count(pulse_id))
            {
                self.buffer.remove(pulse_id, &record);
                self.core.discard_stale(pulse_id);
                continue;
            }

            let first_complete = self.first_complete(watermark);
            if R::SKIPS_TO_FIRST_COMPLETE {
                if let Some(first_complete) = first_complete {
                    if self.core.should_skip_to_first_complete(pulse_id, first_complete) {
                        let skipped = self.buffer.purge_below(&self.core, first_complete);
                        self.core.skip_to_first_complete(first_complete, skipped);
                        continue;
                    }
                }
            }

            let head = HeadView {
                record: &record,
                watermark,
                buffered: self.buffer.len(),
                age: record.age(Instant::now()),
                first_complete,
            };
            let cause = match R::judge(&self.core, &head) {
                HeadState::Pending(timeout) => return Poll::Wait(timeout),
                HeadState::Complete => None,
                HeadState::Evict(cause) => Some(cause),
            };

            if !self.core.advance_watermark(watermark, pulse_id) {
                trace!("Watermark moved past {} while judging pulse {}", watermark, pulse_id);
                continue;
            }
            self.buffer.remove(pulse_id, &record);
            self.complete.remove(&pulse_id);
            // Watermark moved; other consumers may now resolve the next head.
            self.waiters.unpark_all();

            // A shed or startup purge that got there first has accounted for it.
            if !record.try_claim() {
                continue;
            }
            if let Some(pulse) = self.core.resolve(&record, cause) {
                return Poll::Ready(pulse);
            }
        }
    }

    /// Smallest complete pulse above `watermark`, pruning resolved ones
    fn first_complete(&self, watermark: i64) -> Option<i64> {
        while let Some(entry) = self.complete.front() {
            let pulse_id = *entry.value();
            if pulse_id > watermark {
                return Some(pulse_id);
            }
            entry.remove();
        }
        None
    }
}

impl<M: Send + 'static, R: HeadRule> MessageSynchronizer<M> for LockFreeSynchronizer<M, R> {
    fn add_message(&self, message: M) {
        LockFreeSynchronizer::add_message(self, message)
    }

    fn next_message(&self) -> Option<Pulse<M>> {
        LockFreeSynchronizer::next_message(self)
    }

    fn try_next_message(&self) -> Option<Pulse<M>> {
        LockFreeSynchronizer::try_next_message(self)
    }

    fn on_first_message(&self, callback: FirstMessageCallback) {
        self.core.on_first_message(callback)
    }

    fn channels(&self) -> &[ChannelSchedule] {
        self.core.channels()
    }

    fn buffer_size(&self) -> usize {
        LockFreeSynchronizer::buffer_size(self)
    }

    fn close(&self) {
        LockFreeSynchronizer::close(self)
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }
}
