//! # bsread-sync - Multi-Channel Pulse Synchronizer
//!
//! bsread-sync assembles per-pulse records from data channels that report
//! independently, at different rates and without a global ordering. Every
//! channel declares on which pulse-ids it is expected to report; the
//! synchronizer buffers incoming messages per pulse-id and hands each pulse
//! to exactly one consumer once it is complete, or evicts it when it gets
//! too old or the buffer overflows.
//!
//! ## Features
//!
//! - **Schedule-aware completeness**: `(modulo, offset)` channel schedules
//! - **Gap detection**: pulses are held back while an earlier scheduled pulse may still arrive
//! - **Two policies**: strictly ordered `CompleteAll` and latency-first `CompleteLatest`
//! - **Lock-free and lock-based** realizations with identical ordering guarantees
//! - **Time and size eviction**: partial records delivered or dropped by configuration
//! - **Generic messages**: channel name and pulse-id are read through injected accessors
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  add_message   ┌──────────────────────────────┐  next_message  ┌──────────────┐
//! │  Producers   │ ─────────────▶ │        Synchronizer          │ ─────────────▶ │  Consumers   │
//! │ (1 per sub.) │                │  pulse-id → record buffer    │                │  (1..M)      │
//! └──────────────┘                │  watermarks, gap detection   │                └──────────────┘
//!                                 │  eviction, wake-up broadcast │
//!                                 └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use bsread_sync::{ChannelSchedule, CompleteAllSynchronizer, SyncConfig};
//!
//! let sync = CompleteAllSynchronizer::new(
//!     vec![ChannelSchedule::every_pulse("A"), ChannelSchedule::new("B", 2, 0).unwrap()],
//!     SyncConfig::default(),
//!     |m: &(String, i64, f64)| m.0.as_str(),
//!     |m: &(String, i64, f64)| m.1,
//! )
//! .unwrap();
//!
//! sync.add_message(("A".to_string(), 10, 1.5));
//! sync.add_message(("B".to_string(), 10, 2.5));
//!
//! let pulse = sync.next_message().unwrap();
//! assert_eq!(pulse.pulse_id(), 10);
//! assert_eq!(pulse.len(), 2);
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod record;
pub mod stats;
pub mod sync;
pub mod synchronizer;

// Main API re-exports
pub use channel::ChannelSchedule;
pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{EvictionCause, Rejection, Result, SyncError};
pub use record::{Pulse, PulseRecord, Stored};
pub use stats::{StatsSnapshot, SyncStats};
pub use sync::{AtomicWatermark, LockFreeWaitRing, WaitStats};
pub use synchronizer::{
    build_synchronizer, is_pulse_id_missing, CompleteAllSynchronizer, CompleteLatestSynchronizer,
    Concurrency, FirstMessageCallback, HeadRule, LockFreeSynchronizer,
    LockedCompleteAllSynchronizer, MessageSynchronizer, Policy, PulseIter, SynchronizerCore,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod defaults {
    use std::time::Duration;

    /// Default bound on buffered pulse records
    pub const MAX_BUFFERED_RECORDS: usize = 1000;

    /// Default age after which the oldest buffered pulse is evicted
    pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default capacity of the lock-based delivery queue
    pub const DELIVERY_QUEUE_CAPACITY: usize = 1024;
}
