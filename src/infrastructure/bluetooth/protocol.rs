//! BedJet V3 Protocol
//!
//! Status notification decoding and command encoding. Everything here is
//! pure: no I/O and no state.

use crate::domain::models::DeviceStatus;
use crate::domain::modes::PresetMode;
use crate::error::{Error, Result};
use tracing::trace;
use uuid::Uuid;

/// BedJet V3 BLE service UUID
/// The tail spells "BedJet" in ASCII (42 65 64 4A 65 74)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00001000_bed0_0080_aa55_4265644a6574);

/// Status characteristic UUID - notifications carry a full status record
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x00002000_bed0_0080_aa55_4265644a6574);

/// Command characteristic UUID - where commands are written
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x00002004_bed0_0080_aa55_4265644a6574);

/// Lowest settable target temperature (°F)
pub const MIN_TEMPERATURE_F: i32 = 66;
/// Highest settable target temperature (°F)
pub const MAX_TEMPERATURE_F: i32 = 109;

/// Shortest notification that carries every decoded field
pub const MIN_STATUS_LEN: usize = 15;

/// Timer written after every operating mode change
pub const MODE_CHANGE_TIMER_MINUTES: u16 = 600;

/// Temperature bytes are offsets from this value
const TEMPERATURE_BASE: u8 = 0x26;

mod opcode {
    pub const SET_MODE: u8 = 0x01;
    pub const SET_TIME: u8 = 0x02;
    pub const SET_TEMPERATURE: u8 = 0x03;
    pub const SET_FAN: u8 = 0x07;
}

/// A command written to the command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Select an operating mode or preset by its command byte
    SetMode(u8),
    /// Set the run timer, in minutes
    SetTime(u16),
    /// Set the target temperature by its encoded byte
    SetTemperature(u8),
    /// Set the fan speed by step index (0 = 5%, 19 = 100%)
    SetFan(u8),
}

impl Command {
    /// Target temperature in °F, which must lie within the settable bounds.
    pub fn temperature(fahrenheit: i32) -> Result<Self> {
        Ok(Self::SetTemperature(temperature_to_byte(fahrenheit)?))
    }

    /// Fan speed in percent; rounds to the nearest 5% step.
    pub fn fan(percent: u32) -> Result<Self> {
        Ok(Self::SetFan(fan_percent_to_index(percent)?))
    }

    /// Serialize into the bytes written to the device.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::SetMode(mode) => vec![opcode::SET_MODE, mode],
            // the hours byte saturates at 255
            Self::SetTime(minutes) => vec![
                opcode::SET_TIME,
                u8::try_from(minutes / 60).unwrap_or(u8::MAX),
                (minutes % 60) as u8,
            ],
            Self::SetTemperature(byte) => vec![opcode::SET_TEMPERATURE, byte],
            Self::SetFan(index) => vec![opcode::SET_FAN, index],
        }
    }
}

/// Encode a target temperature: `(t - 60) / 9 + (t - 66) + 0x26`.
pub fn temperature_to_byte(fahrenheit: i32) -> Result<u8> {
    if !(MIN_TEMPERATURE_F..=MAX_TEMPERATURE_F).contains(&fahrenheit) {
        return Err(Error::TemperatureOutOfRange(fahrenheit));
    }
    let byte = (fahrenheit - 60) / 9 + (fahrenheit - MIN_TEMPERATURE_F) + TEMPERATURE_BASE as i32;
    // bounded: 0x26..=0x56
    Ok(byte as u8)
}

/// Decode a temperature byte back to °F: `round((d + 66) - d / 9)` with
/// `d = byte - 0x26`, where `d / 9` is the true quotient.
pub fn temperature_from_byte(byte: u8) -> i32 {
    let delta = i32::from(byte) - i32::from(TEMPERATURE_BASE);
    let fahrenheit = f64::from(delta + MIN_TEMPERATURE_F) - f64::from(delta) / 9.0;
    fahrenheit.round() as i32
}

/// `round(percent / 5) - 1`, valid for 3..=100 percent.
pub fn fan_percent_to_index(percent: u32) -> Result<u8> {
    if !(3..=100).contains(&percent) {
        return Err(Error::FanPercentOutOfRange(percent));
    }
    Ok(((percent + 2) / 5 - 1) as u8)
}

/// Decode a status notification.
///
/// # Status Record Layout (first 15 bytes used)
///
/// ```text
/// [0-3]   : Header / unused
/// [4]     : Timer hours
/// [5]     : Timer minutes
/// [6]     : Timer seconds
/// [7]     : Current temperature (encoded)
/// [8]     : Target temperature (encoded)
/// [9]     : Unused
/// [10]    : Fan step, percent / 5
/// [11-12] : Unused
/// [13]    : Secondary mode discriminator (only consulted for 0x50)
/// [14]    : Mode discriminator
/// ```
///
/// The returned status has no `last_seen`; the caller stamps receipt time.
pub fn decode(payload: &[u8]) -> Result<DeviceStatus> {
    if payload.len() < MIN_STATUS_LEN {
        return Err(Error::MalformedPayload(format!(
            "expected at least {} bytes, got {}",
            MIN_STATUS_LEN,
            payload.len()
        )));
    }

    trace!("Status payload: {:02X?}", payload);

    let preset_mode = decode_preset(payload[13], payload[14]).ok_or_else(|| {
        Error::MalformedPayload(format!(
            "unknown mode discriminator {:#04x}/{:#04x}",
            payload[14], payload[13]
        ))
    })?;

    let (hours, minutes, seconds) = (payload[4], payload[5], payload[6]);

    Ok(DeviceStatus {
        current_temperature: temperature_from_byte(payload[7]),
        target_temperature: temperature_from_byte(payload[8]),
        remaining_seconds: u32::from(hours) * 3600 + u32::from(minutes) * 60 + u32::from(seconds),
        timer: format!("{}:{}:{}", hours, minutes, seconds),
        fan_percent: u16::from(payload[10]) * 5,
        preset_mode,
        last_seen: None,
    })
}

/// Resolve the preset from the discriminator bytes. `0x50` is shared by
/// Off and Heat and needs the secondary byte.
fn decode_preset(secondary: u8, primary: u8) -> Option<PresetMode> {
    match (primary, secondary) {
        (0x50, 0x14) => Some(PresetMode::Off),
        (0x50, 0x2d) => Some(PresetMode::Heat),
        (0x50, _) => None,
        (0x34, _) => Some(PresetMode::Cool),
        (0x56, _) => Some(PresetMode::Turbo),
        (0x3e, _) => Some(PresetMode::Dry),
        (0x43, _) => Some(PresetMode::ExtendedHeat),
        (0x20, _) => Some(PresetMode::Memory1),
        (0x21, _) => Some(PresetMode::Memory2),
        (0x22, _) => Some(PresetMode::Memory3),
        _ => None,
    }
}
