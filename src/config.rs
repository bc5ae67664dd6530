//! Synchronizer configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Result, SyncError};

/// Eviction and delivery policy knobs shared by every synchronizer variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Bound on buffered pulse records (`None` = unbounded)
    pub max_buffered_records: Option<usize>,
    /// Age after which the oldest buffered record is evicted (`None` = never)
    pub send_timeout: Option<Duration>,
    /// Deliver evicted partial records instead of dropping them
    pub send_incomplete_messages: bool,
    /// Drop everything older than the first complete pulse on startup (CompleteAll only)
    pub send_first_complete: bool,
    /// Capacity of the lock-based delivery queue
    pub delivery_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_buffered_records: Some(defaults::MAX_BUFFERED_RECORDS),
            send_timeout: Some(defaults::SEND_TIMEOUT),
            send_incomplete_messages: false,
            send_first_complete: true,
            delivery_queue_capacity: defaults::DELIVERY_QUEUE_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Configuration with no eviction limits at all
    pub fn unbounded() -> Self {
        Self {
            max_buffered_records: None,
            send_timeout: None,
            ..Default::default()
        }
    }

    /// Set the buffered record bound
    pub fn with_max_buffered_records(mut self, bound: Option<usize>) -> Self {
        self.max_buffered_records = bound;
        self
    }

    /// Set the send timeout
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set whether evicted incomplete records are delivered
    pub fn with_send_incomplete_messages(mut self, send: bool) -> Self {
        self.send_incomplete_messages = send;
        self
    }

    /// Set the startup bootstrap behavior
    pub fn with_send_first_complete(mut self, send: bool) -> Self {
        self.send_first_complete = send;
        self
    }

    /// Set delivery queue capacity
    pub fn with_delivery_queue_capacity(mut self, capacity: usize) -> Self {
        self.delivery_queue_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_buffered_records == Some(0) {
            return Err(SyncError::invalid_parameter(
                "max_buffered_records",
                "Buffered record bound cannot be zero",
            ));
        }

        if self.send_timeout == Some(Duration::ZERO) {
            return Err(SyncError::invalid_parameter(
                "send_timeout",
                "Send timeout cannot be zero",
            ));
        }

        if self.delivery_queue_capacity == 0 {
            return Err(SyncError::invalid_parameter(
                "delivery_queue_capacity",
                "Delivery queue capacity cannot be zero",
            ));
        }

        Ok(())
    }

    /// Whether `buffered` records exceed the configured bound
    pub fn over_capacity(&self, buffered: usize) -> bool {
        self.max_buffered_records.map_or(false, |bound| buffered > bound)
    }
}

/// Builder pattern for synchronizer configuration
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Create a new builder starting from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of buffered records
    pub fn max_buffered_records(mut self, bound: usize) -> Self {
        self.config.max_buffered_records = Some(bound);
        self
    }

    /// Never evict on capacity
    pub fn unbounded_buffer(mut self) -> Self {
        self.config.max_buffered_records = None;
        self
    }

    /// Evict records older than `timeout`
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = Some(timeout);
        self
    }

    /// Never evict on age
    pub fn no_timeout(mut self) -> Self {
        self.config.send_timeout = None;
        self
    }

    /// Deliver evicted partial records
    pub fn send_incomplete_messages(mut self, send: bool) -> Self {
        self.config.send_incomplete_messages = send;
        self
    }

    /// Drop pulses older than the first complete one on startup
    pub fn send_first_complete(mut self, send: bool) -> Self {
        self.config.send_first_complete = send;
        self
    }

    /// Capacity of the lock-based delivery queue
    pub fn delivery_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.delivery_queue_capacity = capacity;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
