//! Bookkeeping shared by every synchronizer policy and concurrency variant
//!
//! Holds the channel registry, the two pulse-id watermarks, the one-shot
//! first-message hook and the gap-detection algorithm. Policies decide
//! *when* a buffered pulse is resolved; the core decides whether a message
//! is admissible and what resolving a pulse means for the watermark,
//! statistics and logs.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::channel::ChannelSchedule;
use crate::config::SyncConfig;
use crate::error::{EvictionCause, Rejection, Result, SyncError};
use crate::record::{Pulse, PulseRecord};
use crate::stats::SyncStats;
use crate::sync::watermark::{special, AtomicWatermark};

/// Extracts the channel name from a message
pub type ChannelOf<M> = Box<dyn for<'a> Fn(&'a M) -> &'a str + Send + Sync>;

/// Extracts the pulse-id from a message
pub type PulseIdOf<M> = Box<dyn Fn(&M) -> i64 + Send + Sync>;

/// Callback run once on the first accepted message
pub type FirstMessageCallback = Box<dyn FnOnce() + Send>;

/// Whether a scheduled-but-unseen pulse may lie strictly between
/// `last_pulse_id` and `candidate_pulse_id` for any of `channels`.
pub fn is_pulse_id_missing(
    last_pulse_id: i64,
    candidate_pulse_id: i64,
    channels: &[ChannelSchedule],
) -> bool {
    let last = last_pulse_id as i128;
    let candidate = candidate_pulse_id as i128;

    channels.iter().any(|channel| {
        let modulo = channel.modulo() as i128;
        let offset = channel.offset() as i128;

        if candidate - last > modulo {
            return true;
        }

        let last_hops = (last + modulo - offset) / modulo;
        let next_hops = (candidate + modulo - offset) / modulo;
        match next_hops - last_hops {
            0 => false,
            1 => {
                (last - offset).rem_euclid(modulo) != 0
                    && (candidate - offset).rem_euclid(modulo) != 0
            }
            hops => hops > 1,
        }
    })
}

/// What a policy should do with the oldest buffered pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
    /// Force resolution now
    Evict(EvictionCause),
    /// Every expected channel reported and nothing can be missing before it
    Complete,
    /// Nothing to do yet; re-check after the given time (if any)
    Pending(Option<Duration>),
}

/// Admitted message coordinates, with the channel name borrowed from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted<'a> {
    pub channel: &'a str,
    pub pulse_id: i64,
}

/// Run-once hook for the first accepted message
#[derive(Default)]
pub struct FirstMessageHook {
    armed: AtomicBool,
    callback: Mutex<Option<FirstMessageCallback>>,
}

impl FirstMessageHook {
    /// Install `callback`, replacing one that has not fired yet
    pub fn set(&self, callback: FirstMessageCallback) {
        *self.callback.lock() = Some(callback);
        self.armed.store(true, Ordering::Release);
    }

    /// Run the installed callback if it has not run yet
    ///
    /// A panicking callback is logged and swallowed.
    pub fn fire(&self) {
        if !self.armed.load(Ordering::Acquire) || !self.armed.swap(false, Ordering::AcqRel) {
            return;
        }
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!("First message callback panicked");
            }
        }
    }

    /// Whether a callback is waiting to fire
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for FirstMessageHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstMessageHook")
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Shared state of a synchronizer instance
pub struct SynchronizerCore<M> {
    channels: Vec<ChannelSchedule>,
    index: HashMap<String, usize>,
    channel_of: ChannelOf<M>,
    pulse_id_of: PulseIdOf<M>,
    config: SyncConfig,
    smallest_received: AtomicWatermark,
    last_resolved: AtomicWatermark,
    /// Highest pulse-id whose incomplete record was shed ahead of the watermark
    shed_through: AtomicWatermark,
    delivered_any: AtomicBool,
    closed: AtomicBool,
    first_message: FirstMessageHook,
    stats: SyncStats,
}

impl<M> SynchronizerCore<M> {
    /// Create the core, validating the channel registry and configuration
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
        config.validate()?;
        if channels.is_empty() {
            return Err(SyncError::NoChannels);
        }

        let mut index = HashMap::with_capacity(channels.len());
        for (position, channel) in channels.iter().enumerate() {
            if index.insert(channel.name().to_string(), position).is_some() {
                return Err(SyncError::duplicate_channel(channel.name()));
            }
        }

        Ok(Self {
            channels,
            index,
            channel_of: Box::new(channel_of),
            pulse_id_of: Box::new(pulse_id_of),
            config,
            smallest_received: AtomicWatermark::new(special::NOTHING_RECEIVED),
            last_resolved: AtomicWatermark::new(special::NOTHING_RESOLVED),
            shed_through: AtomicWatermark::new(special::NOTHING_RESOLVED),
            delivered_any: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            first_message: FirstMessageHook::default(),
            stats: SyncStats::default(),
        })
    }

    /// Registered channel schedules
    pub fn channels(&self) -> &[ChannelSchedule] {
        &self.channels
    }

    /// Schedule registered under `name`
    pub fn schedule(&self, name: &str) -> Option<&ChannelSchedule> {
        self.index.get(name).map(|&position| &self.channels[position])
    }

    /// Active configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Running statistics
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Number of channels scheduled to report on `pulse_id`
    pub fn expected_channel_count(&self, pulse_id: i64) -> usize {
        self.channels
            .iter()
            .filter(|channel| channel.expects(pulse_id))
            .count()
    }

    /// Gap detection against the registered schedules
    pub fn is_pulse_id_missing(&self, last_pulse_id: i64, candidate_pulse_id: i64) -> bool {
        is_pulse_id_missing(last_pulse_id, candidate_pulse_id, &self.channels)
    }

    /// Highest pulse-id delivered or deleted so far
    pub fn last_resolved(&self) -> i64 {
        self.last_resolved.load()
    }

    /// Smallest pulse-id ever accepted
    pub fn smallest_received(&self) -> i64 {
        self.smallest_received.load()
    }

    /// Highest pulse-id shed on overflow, `NOTHING_RESOLVED` if none
    pub fn shed_through(&self) -> i64 {
        self.shed_through.load()
    }

    /// Whether any pulse has been handed to a consumer
    pub fn delivered_any(&self) -> bool {
        self.delivered_any.load(Ordering::Acquire)
    }

    /// Pulse-id gap detection for `head` is measured from, given the
    /// watermark the caller observed.
    ///
    /// Until something is resolved the stream is taken to start at the
    /// smallest pulse ever accepted. Shed pulses below the head count as
    /// resolved.
    pub fn gap_base(&self, watermark: i64, head: i64) -> i64 {
        let base = match watermark {
            special::NOTHING_RESOLVED => self.smallest_received().saturating_sub(1),
            last => last,
        };
        match self.shed_through() {
            special::NOTHING_RESOLVED => base,
            shed => base.max(shed.min(head.saturating_sub(1))),
        }
    }

    /// Install the one-shot first-message callback
    pub fn on_first_message(&self, callback: FirstMessageCallback) {
        self.first_message.set(callback);
    }

    /// Classify an inbound message, logging and counting rejections
    pub fn admit(&self, message: &M) -> std::result::Result<Admitted<'_>, Rejection> {
        let channel = (self.channel_of)(message);
        let pulse_id = (self.pulse_id_of)(message);

        let rejection = if self.is_closed() {
            Rejection::Closed
        } else {
            match self.schedule(channel) {
                None => Rejection::UnknownChannel,
                Some(_) if pulse_id <= self.last_resolved() => Rejection::StalePulse,
                Some(schedule) if !schedule.expects(pulse_id) => Rejection::ScheduleMismatch,
                Some(schedule) => {
                    return Ok(Admitted {
                        channel: schedule.name(),
                        pulse_id,
                    })
                }
            }
        };

        match rejection {
            Rejection::Closed => warn!(
                "Ignoring message of channel '{}' for pulse {} after close",
                channel, pulse_id
            ),
            Rejection::StalePulse => debug!(
                "Dropping message of channel '{}' for pulse {}: already resolved up to {}",
                channel,
                pulse_id,
                self.last_resolved()
            ),
            reason => debug!(
                "Dropping message of channel '{}' for pulse {}: {}",
                channel, pulse_id, reason
            ),
        }
        self.stats.record_rejected(rejection);
        Err(rejection)
    }

    /// Bookkeeping for an admitted message, run before it is buffered
    pub fn accept(&self, pulse_id: i64) {
        self.smallest_received.lower_to(pulse_id);
        self.stats.record_accepted();
        self.first_message.fire();
    }

    /// Count a message that replaced an earlier value for its channel
    pub(crate) fn record_overwrite(&self, channel: &str, pulse_id: i64) {
        debug!(
            "Channel '{}' reported pulse {} more than once, keeping the latest value",
            channel, pulse_id
        );
        self.stats.record_overwritten();
    }

    /// Whether `record` holds every expected channel
    pub fn is_record_complete(&self, record: &PulseRecord<M>) -> bool {
        record.len() >= self.expected_channel_count(record.pulse_id())
    }

    /// Decide the fate of the oldest buffered record against `watermark`
    pub(crate) fn head_state(
        &self,
        record: &PulseRecord<M>,
        watermark: i64,
        buffered: usize,
        age: Duration,
        require_gap_free: bool,
    ) -> HeadState {
        if let Some(timeout) = self.config.send_timeout {
            if age >= timeout {
                return HeadState::Evict(EvictionCause::Timeout);
            }
        }

        if self.config.over_capacity(buffered) {
            return HeadState::Evict(EvictionCause::Capacity);
        }

        let pulse_id = record.pulse_id();
        if self.is_record_complete(record)
            && (!require_gap_free || !self.is_pulse_id_missing(self.gap_base(watermark, pulse_id), pulse_id))
        {
            return HeadState::Complete;
        }

        HeadState::Pending(self.config.send_timeout.map(|timeout| timeout - age))
    }

    /// Whether the startup rule should skip ahead to `first_complete`
    pub(crate) fn should_skip_to_first_complete(&self, head: i64, first_complete: i64) -> bool {
        self.config.send_first_complete && !self.delivered_any() && first_complete > head
    }

    /// Move the watermark just below the first complete pulse
    pub(crate) fn skip_to_first_complete(&self, first_complete: i64, skipped: usize) {
        info!(
            "First complete pulse is {}, dropping {} older buffered pulse(s)",
            first_complete, skipped
        );
        self.last_resolved.raise_to(first_complete - 1);
    }

    /// Count and log a pulse dropped on the startup skip
    pub(crate) fn record_skipped(&self, pulse_id: i64) {
        debug!("Dropping pulse {} older than the first complete pulse", pulse_id);
        self.stats.record_dropped();
    }

    /// Log a late message whose pulse was resolved or shed while it was stored
    pub(crate) fn discard_stale(&self, pulse_id: i64) {
        debug!(
            "Discarding late data for pulse {} (watermark {}, shed through {})",
            pulse_id,
            self.last_resolved(),
            self.shed_through()
        );
    }

    /// Claim `pulse_id` as the next resolved pulse.
    ///
    /// Succeeds only if the watermark still holds the `observed` value the
    /// head was judged against, so a decision is never applied after another
    /// resolution moved the stream on. At most one caller wins per pulse-id.
    pub(crate) fn advance_watermark(&self, observed: i64, pulse_id: i64) -> bool {
        self.last_resolved.advance_from(observed, pulse_id)
    }

    /// Note that the incomplete record of `pulse_id` was shed on overflow
    pub(crate) fn record_shed(&self, pulse_id: i64) {
        self.shed_through.raise_to(pulse_id);
    }

    /// Resolve a record whose pulse-id the caller has claimed.
    ///
    /// Returns the pulse if it is to be delivered.
    pub(crate) fn resolve(
        &self,
        record: &PulseRecord<M>,
        cause: Option<EvictionCause>,
    ) -> Option<Pulse<M>> {
        let pulse_id = record.pulse_id();
        let complete = self.is_record_complete(record);

        if let Some(cause) = cause {
            self.stats.record_eviction(cause);
            match cause {
                EvictionCause::Capacity => info!(
                    "Evicting pulse {} ({} of {} channels): buffer bound {:?} exceeded",
                    pulse_id,
                    record.len(),
                    self.expected_channel_count(pulse_id),
                    self.config.max_buffered_records
                ),
                _ => debug!(
                    "Evicting pulse {} ({} of {} channels): {}",
                    pulse_id,
                    record.len(),
                    self.expected_channel_count(pulse_id),
                    cause
                ),
            }
        }

        if cause.is_none() || complete || self.config.send_incomplete_messages {
            self.delivered_any.store(true, Ordering::Release);
            self.stats.record_delivered(complete);
            Some(record.take(complete))
        } else {
            self.stats.record_dropped();
            None
        }
    }

    /// Mark the synchronizer closed; true only for the first call
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<M> fmt::Debug for SynchronizerCore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizerCore")
            .field("channels", &self.channels)
            .field("config", &self.config)
            .field("smallest_received", &self.smallest_received())
            .field("last_resolved", &self.last_resolved())
            .field("closed", &self.is_closed())
            .finish()
    }
}
