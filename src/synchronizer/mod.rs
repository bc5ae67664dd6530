//! Multi-channel pulse synchronizers
//!
//! Producers feed messages of independently scheduled channels through
//! [`MessageSynchronizer::add_message`]; consumers block in
//! [`MessageSynchronizer::next_message`] and receive one assembled
//! [`Pulse`] per pulse-id, or `None` once the synchronizer is closed.
//!
//! Two delivery policies exist:
//!
//! - [`Policy::CompleteAll`] resolves pulses strictly in ascending order and
//!   waits until no scheduled pulse can still be missing.
//! - [`Policy::CompleteLatest`] surfaces the newest complete pulse as soon as
//!   possible and abandons older incomplete ones.

use std::marker::PhantomData;
use std::str::FromStr;

use crate::channel::ChannelSchedule;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::record::Pulse;
use crate::stats::StatsSnapshot;

mod buffer;
pub mod complete_all;
pub mod complete_all_locked;
pub mod complete_latest;
pub mod core;
pub mod lock_free;


pub use self::complete_all::{CompleteAllRule, CompleteAllSynchronizer};
pub use self::complete_all_locked::LockedCompleteAllSynchronizer;
pub use self::complete_latest::{CompleteLatestRule, CompleteLatestSynchronizer};
pub use self::core::{is_pulse_id_missing, FirstMessageCallback, HeadState, SynchronizerCore};
pub use self::lock_free::{HeadRule, HeadView, LockFreeSynchronizer};

/// Common interface of every synchronizer variant
pub trait MessageSynchronizer<M>: Send + Sync {
    /// Buffer one message; never blocks and never fails
    fn add_message(&self, message: M);

    /// Block until a pulse is ready; `None` once closed
    fn next_message(&self) -> Option<Pulse<M>>;

    /// Non-blocking variant of [`next_message`](Self::next_message)
    fn try_next_message(&self) -> Option<Pulse<M>>;

    /// Run `callback` once, on the next accepted message
    fn on_first_message(&self, callback: FirstMessageCallback);

    /// Registered channel schedules
    fn channels(&self) -> &[ChannelSchedule];

    /// Number of buffered pulse records (diagnostics only)
    fn buffer_size(&self) -> usize;

    /// Release all waiting consumers; idempotent
    fn close(&self);

    /// Whether [`close`](Self::close) has been called
    fn is_closed(&self) -> bool;

    /// Snapshot of the running counters
    fn stats(&self) -> StatsSnapshot;

    /// Blocking iterator over delivered pulses, ending on close
    fn pulses(&self) -> PulseIter<'_, M, Self>
    where
        Self: Sized,
    {
        PulseIter::new(self)
    }
}

/// Iterator adapter over [`MessageSynchronizer::next_message`]
pub struct PulseIter<'a, M, S: ?Sized> {
    synchronizer: &'a S,
    _message: PhantomData<fn() -> M>,
}

impl<'a, M, S: MessageSynchronizer<M> + ?Sized> PulseIter<'a, M, S> {
    /// Iterate over the pulses delivered by `synchronizer`
    pub fn new(synchronizer: &'a S) -> Self {
        Self {
            synchronizer,
            _message: PhantomData,
        }
    }
}

impl<M, S: MessageSynchronizer<M> + ?Sized> Iterator for PulseIter<'_, M, S> {
    type Item = Pulse<M>;

    fn next(&mut self) -> Option<Self::Item> {
        self.synchronizer.next_message()
    }
}

/// Delivery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Strictly ordered, gap-aware delivery
    #[default]
    CompleteAll,
    /// Lowest latency, older incomplete pulses are abandoned
    CompleteLatest,
}

impl FromStr for Policy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "all" | "complete-all" => Ok(Policy::CompleteAll),
            "latest" | "complete-latest" => Ok(Policy::CompleteLatest),
            other => Err(SyncError::invalid_parameter(
                "policy",
                format!("Unknown policy '{}', expected 'all' or 'latest'", other),
            )),
        }
    }
}

/// Concurrency realization of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Concurrent skip list, CAS watermarks and park/unpark broadcast
    #[default]
    LockFree,
    /// Single mutex, bounded delivery queue and condition variable
    Locked,
}

/// Build a synchronizer for the requested policy and concurrency realization
///
/// `CompleteLatest` only exists lock-free.
pub fn build_synchronizer<M, C, P>(
    policy: Policy,
    concurrency: Concurrency,
    channels: Vec<ChannelSchedule>,
    config: SyncConfig,
    channel_of: C,
    pulse_id_of: P,
) -> Result<Box<dyn MessageSynchronizer<M>>>
where
    M: Send + 'static,
    C: for<'a> Fn(&'a M) -> &'a str + Send + Sync + 'static,
    P: Fn(&M) -> i64 + Send + Sync + 'static,
{
    match (policy, concurrency) {
        (Policy::CompleteAll, Concurrency::LockFree) => Ok(Box::new(
            CompleteAllSynchronizer::new(channels, config, channel_of, pulse_id_of)?,
        )),
        (Policy::CompleteAll, Concurrency::Locked) => Ok(Box::new(
            LockedCompleteAllSynchronizer::new(channels, config, channel_of, pulse_id_of)?,
        )),
        (Policy::CompleteLatest, Concurrency::LockFree) => Ok(Box::new(
            CompleteLatestSynchronizer::new(channels, config, channel_of, pulse_id_of)?,
        )),
        (Policy::CompleteLatest, Concurrency::Locked) => Err(SyncError::invalid_parameter(
            "concurrency",
            "CompleteLatest is only available lock-free",
        )),
    }
}
