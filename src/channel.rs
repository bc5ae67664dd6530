//! Channel schedules: which pulse-ids a channel is expected to report on

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Immutable descriptor of a channel's sampling schedule.
///
/// A channel with `modulo = M` and `offset = O` reports on pulse `p`
/// iff `(p - O) mod M == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ScheduleFields")]
pub struct ChannelSchedule {
    name: String,
    modulo: i64,
    offset: i64,
}

/// Unvalidated wire form, checked through [`ChannelSchedule::new`] on deserialize
#[derive(Deserialize)]
struct ScheduleFields {
    name: String,
    #[serde(default = "default_modulo")]
    modulo: i64,
    #[serde(default)]
    offset: i64,
}

fn default_modulo() -> i64 {
    1
}

impl TryFrom<ScheduleFields> for ChannelSchedule {
    type Error = SyncError;

    fn try_from(fields: ScheduleFields) -> Result<Self> {
        Self::new(fields.name, fields.modulo, fields.offset)
    }
}

impl ChannelSchedule {
    /// Create a new schedule, validating modulo and offset
    pub fn new(name: impl Into<String>, modulo: i64, offset: i64) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SyncError::invalid_parameter("name", "Channel name cannot be empty"));
        }
        if modulo < 1 {
            return Err(SyncError::invalid_parameter(
                "modulo",
                format!("Modulo of channel '{}' must be at least 1, got {}", name, modulo),
            ));
        }
        if offset < 0 {
            return Err(SyncError::invalid_parameter(
                "offset",
                format!("Offset of channel '{}' cannot be negative, got {}", name, offset),
            ));
        }
        Ok(Self { name, modulo, offset })
    }

    /// Channel reporting on every pulse
    pub fn every_pulse(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modulo: 1,
            offset: 0,
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sampling period in pulses
    pub fn modulo(&self) -> i64 {
        self.modulo
    }

    /// Phase of the sampling period
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Whether this channel is scheduled to report on `pulse_id`
    pub fn expects(&self, pulse_id: i64) -> bool {
        // Widened so pulse ids near the i64 limits cannot overflow.
        let delta = pulse_id as i128 - self.offset as i128;
        (delta + self.modulo as i128).rem_euclid(self.modulo as i128) == 0
    }
}

/// Parses `name`, `name:modulo` or `name:modulo:offset`
impl FromStr for ChannelSchedule {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self> {
        let mut parts = value.trim().split(':');
        let name = parts.next().unwrap_or_default();
        let modulo = parse_field(parts.next(), "modulo", 1)?;
        let offset = parse_field(parts.next(), "offset", 0)?;
        if parts.next().is_some() {
            return Err(SyncError::invalid_parameter(
                "channel",
                format!("Expected name[:modulo[:offset]], got '{}'", value),
            ));
        }
        Self::new(name, modulo, offset)
    }
}

fn parse_field(field: Option<&str>, parameter: &str, default: i64) -> Result<i64> {
    match field {
        None => Ok(default),
        Some(text) => text.parse().map_err(|_| {
            SyncError::invalid_parameter(parameter, format!("'{}' is not an integer", text))
        }),
    }
}
