use crate::domain::modes::{FanLevel, OperatingMode, PresetMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bluetooth address of one physical appliance, usually a MAC string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Subscribed,
}

/// One decoded status notification.
///
/// The operating mode is not stored: it is always derived from the preset,
/// so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// Current temperature (°F)
    pub current_temperature: i32,
    /// Target temperature (°F)
    pub target_temperature: i32,
    /// Run time left on the timer, in seconds
    pub remaining_seconds: u32,
    /// Same value as `remaining_seconds`, formatted "H:M:S"
    pub timer: String,
    /// Fan speed, 0-100 in steps of 5
    pub fan_percent: u16,
    pub preset_mode: PresetMode,
    /// Receipt time; `None` until the subscription stamps it
    pub last_seen: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    pub fn operating_mode(&self) -> OperatingMode {
        self.preset_mode.to_operating_mode()
    }

    pub fn fan_level(&self) -> Option<FanLevel> {
        FanLevel::from_percent(Some(u32::from(self.fan_percent)))
    }

    /// Returns the same snapshot marked as received at `at`.
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = Some(at);
        self
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A notification was decoded and replaced the stored status.
    StatusUpdated(DeviceStatus),
    ConnectionState(ConnectionState),
    /// A notification was dropped; the stored status is unchanged.
    DecodeFailed { payload: Vec<u8>, reason: String },
}
