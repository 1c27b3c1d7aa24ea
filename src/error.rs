use crate::domain::models::DeviceAddress;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by a device session and its components.
///
/// Transport failures never escape a retry loop as-is: once a budget is
/// exhausted they are converted into [`Error::ConnectionFailed`] or
/// [`Error::SubscriptionFailed`].
#[derive(Debug, Error)]
pub enum Error {
    /// Every connect attempt failed.
    #[error("failed to connect to {address} after {attempts} attempts")]
    ConnectionFailed {
        address: DeviceAddress,
        attempts: u32,
    },

    /// Connected, but the notification subscription could not be established.
    #[error("failed to subscribe to {address} on {characteristic} after {attempts} attempts")]
    SubscriptionFailed {
        address: DeviceAddress,
        characteristic: Uuid,
        attempts: u32,
    },

    /// A single notification could not be decoded. Non-fatal.
    #[error("malformed status payload: {0}")]
    MalformedPayload(String),

    /// A mode name outside the closed enumeration reached the mode model.
    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    #[error("target temperature {0}°F outside 66..=109°F")]
    TemperatureOutOfRange(i32),

    #[error("fan percent {0} outside 3..=100")]
    FanPercentOutOfRange(u32),

    /// Writing a command to a connected device failed.
    #[error("failed to write command to {address}: {reason}")]
    WriteFailed {
        address: DeviceAddress,
        reason: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
