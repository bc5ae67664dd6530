//! Per-pulse accumulation and the assembled record handed to consumers

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Mutable accumulator for one pulse-id.
///
/// Producers insert concurrently. Exactly one thread claims the record for
/// resolution; after that no further values are stored into it.
#[derive(Debug)]
pub struct PulseRecord<M> {
    pulse_id: i64,
    submit_time: Instant,
    slot: Mutex<Slot<M>>,
}

#[derive(Debug)]
struct Slot<M> {
    values: HashMap<String, M>,
    claimed: bool,
}

/// Outcome of storing one channel value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored<M> {
    /// First value of the channel for this pulse
    Added,
    /// Replaced an earlier value of the same channel
    Replaced(M),
    /// The record was already claimed; the value was not stored
    Claimed,
}

impl<M> PulseRecord<M> {
    /// Create an empty record stamped with the current time
    pub fn new(pulse_id: i64) -> Self {
        Self::with_submit_time(pulse_id, Instant::now())
    }

    /// Create an empty record with an explicit submit time
    pub fn with_submit_time(pulse_id: i64, submit_time: Instant) -> Self {
        Self {
            pulse_id,
            submit_time,
            slot: Mutex::new(Slot {
                values: HashMap::new(),
                claimed: false,
            }),
        }
    }

    /// Pulse-id this record accumulates
    pub fn pulse_id(&self) -> i64 {
        self.pulse_id
    }

    /// Instant the first message for this pulse arrived
    pub fn submit_time(&self) -> Instant {
        self.submit_time
    }

    /// Time elapsed since the record was created
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.submit_time)
    }

    /// Store `message` for `channel`.
    ///
    /// Last write wins for a repeated (channel, pulse-id) pair. Nothing is
    /// stored once the record has been claimed.
    pub fn insert(&self, channel: &str, message: M) -> Stored<M> {
        let mut slot = self.slot.lock();
        if slot.claimed {
            return Stored::Claimed;
        }
        match slot.values.insert(channel.to_string(), message) {
            Some(previous) => Stored::Replaced(previous),
            None => Stored::Added,
        }
    }

    /// Take exclusive ownership for resolution; true for exactly one caller
    pub fn try_claim(&self) -> bool {
        let mut slot = self.slot.lock();
        !std::mem::replace(&mut slot.claimed, true)
    }

    /// Claim the record only while fewer than `expected` channels reported.
    ///
    /// Checked under the same lock as [`insert`](Self::insert), so a record
    /// that completes can no longer be shed.
    pub fn try_shed(&self, expected: usize) -> bool {
        let mut slot = self.slot.lock();
        if slot.claimed || slot.values.len() >= expected {
            return false;
        }
        slot.claimed = true;
        true
    }

    /// Whether a thread owns the record's resolution
    pub fn is_claimed(&self) -> bool {
        self.slot.lock().claimed
    }

    /// Number of channels that have reported
    pub fn len(&self) -> usize {
        self.slot.lock().values.len()
    }

    /// Whether no channel has reported yet
    pub fn is_empty(&self) -> bool {
        self.slot.lock().values.is_empty()
    }

    /// Whether `channel` has reported
    pub fn contains(&self, channel: &str) -> bool {
        self.slot.lock().values.contains_key(channel)
    }

    /// Move the accumulated values out into a deliverable [`Pulse`]
    pub fn take(&self, complete: bool) -> Pulse<M> {
        let values = std::mem::take(&mut self.slot.lock().values);
        Pulse {
            pulse_id: self.pulse_id,
            values,
            complete,
        }
    }
}

/// Assembled per-pulse record returned by `next_message`
#[derive(Debug, Clone, PartialEq)]
pub struct Pulse<M> {
    pulse_id: i64,
    values: HashMap<String, M>,
    complete: bool,
}

impl<M> Pulse<M> {
    /// Pulse-id of this record
    pub fn pulse_id(&self) -> i64 {
        self.pulse_id
    }

    /// Whether every expected channel had reported when the pulse was resolved
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of channel values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record holds no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value reported by `channel`
    pub fn get(&self, channel: &str) -> Option<&M> {
        self.values.get(channel)
    }

    /// Borrow the channel → value map
    pub fn values(&self) -> &HashMap<String, M> {
        &self.values
    }

    /// Consume into the channel → value map
    pub fn into_values(self) -> HashMap<String, M> {
        self.values
    }
}
