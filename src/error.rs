//! Error types and rejection taxonomy for the pulse synchronizer

use std::fmt;

/// Result type alias for synchronizer construction
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while building a synchronizer or its configuration.
///
/// Runtime operations (`add_message`, `next_message`) never return these;
/// they log and drop instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Two schedules registered under the same channel name
    #[error("Duplicate channel: {name}")]
    DuplicateChannel { name: String },

    /// A synchronizer needs at least one channel to synchronize
    #[error("No channels configured")]
    NoChannels,
}

impl SyncError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate channel error
    pub fn duplicate_channel(name: impl Into<String>) -> Self {
        Self::DuplicateChannel { name: name.into() }
    }
}

/// Why an inbound message was dropped by `add_message`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Channel is not part of the registry
    UnknownChannel,
    /// Pulse-id is at or below the delivered/deleted watermark
    StalePulse,
    /// Channel schedule does not expect this pulse-id
    ScheduleMismatch,
    /// Synchronizer was already closed
    Closed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnknownChannel => write!(f, "unknown channel"),
            Rejection::StalePulse => write!(f, "stale pulse"),
            Rejection::ScheduleMismatch => write!(f, "schedule mismatch"),
            Rejection::Closed => write!(f, "synchronizer closed"),
        }
    }
}

/// Reason a buffered pulse was resolved without waiting for completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionCause {
    /// Oldest record exceeded the send timeout
    Timeout,
    /// Buffer exceeded the configured record bound
    Capacity,
    /// A newer pulse completed first and the older one became stale
    Superseded,
}

impl fmt::Display for EvictionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionCause::Timeout => write!(f, "timeout"),
            EvictionCause::Capacity => write!(f, "capacity"),
            EvictionCause::Superseded => write!(f, "superseded"),
        }
    }
}
