//! Synchronizer statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EvictionCause, Rejection};

/// Running counters of a synchronizer
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Messages stored into a pulse record
    pub messages_accepted: AtomicU64,
    /// Messages dropped on arrival
    pub messages_rejected: AtomicU64,
    /// Rejected messages whose pulse was already resolved
    pub stale_messages: AtomicU64,
    /// Messages replacing an earlier value for the same channel and pulse
    pub messages_overwritten: AtomicU64,
    /// Pulses handed to a consumer
    pub pulses_delivered: AtomicU64,
    /// Delivered pulses missing at least one expected channel
    pub pulses_delivered_incomplete: AtomicU64,
    /// Pulses resolved without delivery
    pub pulses_dropped: AtomicU64,
    /// Evictions caused by the send timeout
    pub timeout_evictions: AtomicU64,
    /// Evictions caused by the buffer bound
    pub capacity_evictions: AtomicU64,
    /// Older pulses abandoned for a newer complete one
    pub superseded_pulses: AtomicU64,
}

impl SyncStats {
    /// Record an accepted message
    pub fn record_accepted(&self) {
        self.messages_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected message
    pub fn record_rejected(&self, reason: Rejection) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
        if reason == Rejection::StalePulse {
            self.stale_messages.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an overwritten channel value
    pub fn record_overwritten(&self) {
        self.messages_overwritten.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivered pulse
    pub fn record_delivered(&self, complete: bool) {
        self.pulses_delivered.fetch_add(1, Ordering::Relaxed);
        if !complete {
            self.pulses_delivered_incomplete.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a dropped pulse
    pub fn record_dropped(&self) {
        self.pulses_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a forced resolution
    pub fn record_eviction(&self, cause: EvictionCause) {
        let counter = match cause {
            EvictionCause::Timeout => &self.timeout_evictions,
            EvictionCause::Capacity => &self.capacity_evictions,
            EvictionCause::Superseded => &self.superseded_pulses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_accepted: self.messages_accepted.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            stale_messages: self.stale_messages.load(Ordering::Relaxed),
            messages_overwritten: self.messages_overwritten.load(Ordering::Relaxed),
            pulses_delivered: self.pulses_delivered.load(Ordering::Relaxed),
            pulses_delivered_incomplete: self.pulses_delivered_incomplete.load(Ordering::Relaxed),
            pulses_dropped: self.pulses_dropped.load(Ordering::Relaxed),
            timeout_evictions: self.timeout_evictions.load(Ordering::Relaxed),
            capacity_evictions: self.capacity_evictions.load(Ordering::Relaxed),
            superseded_pulses: self.superseded_pulses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SyncStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_accepted: u64,
    pub messages_rejected: u64,
    pub stale_messages: u64,
    pub messages_overwritten: u64,
    pub pulses_delivered: u64,
    pub pulses_delivered_incomplete: u64,
    pub pulses_dropped: u64,
    pub timeout_evictions: u64,
    pub capacity_evictions: u64,
    pub superseded_pulses: u64,
}

impl StatsSnapshot {
    /// Pulses resolved either way
    pub fn pulses_resolved(&self) -> u64 {
        self.pulses_delivered + self.pulses_dropped
    }
}
