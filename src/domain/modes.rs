//! Mode Model
//!
//! Operating modes, presets and fan levels of the appliance, with the
//! command byte each one is selected by.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};

/// Coarse operating mode as reported to the host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Off,
    Cool,
    Heat,
    Dry,
}

impl OperatingMode {
    pub fn command_byte(self) -> u8 {
        match self {
            Self::Off => 0x01,
            Self::Cool => 0x02,
            Self::Heat => 0x03,
            Self::Dry => 0x05,
        }
    }
}

impl FromStr for OperatingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|mode| AsRef::<str>::as_ref(mode) == s)
            .ok_or_else(|| Error::UnknownMode(s.to_string()))
    }
}

/// Fine-grained selection; every preset implies exactly one operating mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PresetMode {
    Off,
    Cool,
    Heat,
    Dry,
    Turbo,
    #[strum(serialize = "ext_ht")]
    #[serde(rename = "ext_ht")]
    ExtendedHeat,
    #[strum(serialize = "m1")]
    #[serde(rename = "m1")]
    Memory1,
    #[strum(serialize = "m2")]
    #[serde(rename = "m2")]
    Memory2,
    #[strum(serialize = "m3")]
    #[serde(rename = "m3")]
    Memory3,
}

impl PresetMode {
    pub fn command_byte(self) -> u8 {
        match self {
            Self::Off => OperatingMode::Off.command_byte(),
            Self::Cool => OperatingMode::Cool.command_byte(),
            Self::Heat => OperatingMode::Heat.command_byte(),
            Self::Dry => OperatingMode::Dry.command_byte(),
            Self::Turbo => 0x04,
            Self::ExtendedHeat => 0x06,
            Self::Memory1 => 0x20,
            Self::Memory2 => 0x21,
            Self::Memory3 => 0x22,
        }
    }

    /// Project onto the coarse mode. Many-to-one, so there is no inverse.
    ///
    /// The memory slots can hold any program; the appliance ships them as
    /// heat programs, so they report as `Heat`.
    pub fn to_operating_mode(self) -> OperatingMode {
        match self {
            Self::Off => OperatingMode::Off,
            Self::Cool => OperatingMode::Cool,
            Self::Dry => OperatingMode::Dry,
            Self::Heat
            | Self::Turbo
            | Self::ExtendedHeat
            | Self::Memory1
            | Self::Memory2
            | Self::Memory3 => OperatingMode::Heat,
        }
    }
}

impl From<OperatingMode> for PresetMode {
    fn from(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::Off => Self::Off,
            OperatingMode::Cool => Self::Cool,
            OperatingMode::Heat => Self::Heat,
            OperatingMode::Dry => Self::Dry,
        }
    }
}

impl FromStr for PresetMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|mode| AsRef::<str>::as_ref(mode) == s)
            .ok_or_else(|| Error::UnknownMode(s.to_string()))
    }
}

/// Named fan speed tiers. Each value is the upper bound, in percent, of the tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FanLevel {
    Min,
    Low,
    Medium,
    High,
    Max,
}

impl FanLevel {
    pub fn percent(self) -> u32 {
        match self {
            Self::Min => 10,
            Self::Low => 25,
            Self::Medium => 50,
            Self::High => 75,
            Self::Max => 100,
        }
    }

    /// Lowest tier whose threshold is at or above `percent`.
    /// Returns `None` when the value is absent or above 100. A fan at 0%
    /// resolves to `Min`, not `None`.
    pub fn from_percent(percent: Option<u32>) -> Option<Self> {
        let percent = percent?;
        Self::iter().find(|level| percent <= level.percent())
    }
}

impl FromStr for FanLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|level| AsRef::<str>::as_ref(level) == s)
            .ok_or_else(|| Error::UnknownMode(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_projection() {
        assert_eq!(PresetMode::Turbo.to_operating_mode(), OperatingMode::Heat);
        assert_eq!(PresetMode::ExtendedHeat.to_operating_mode(), OperatingMode::Heat);
        assert_eq!(PresetMode::Cool.to_operating_mode(), OperatingMode::Cool);
        assert_eq!(PresetMode::Off.to_operating_mode(), OperatingMode::Off);

        // total and stable over every preset
        for preset in PresetMode::iter() {
            let mode = preset.to_operating_mode();
            assert_eq!(preset.to_operating_mode(), mode);
        }
        assert_eq!(PresetMode::iter().count(), 9);
    }

    #[test]
    fn test_shared_presets_reuse_mode_bytes() {
        for mode in OperatingMode::iter() {
            let preset = PresetMode::from(mode);
            assert_eq!(preset.command_byte(), mode.command_byte());
            assert_eq!(preset.to_operating_mode(), mode);
        }
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(OperatingMode::Off.command_byte(), 0x01);
        assert_eq!(OperatingMode::Dry.command_byte(), 0x05);
        assert_eq!(PresetMode::Turbo.command_byte(), 0x04);
        assert_eq!(PresetMode::ExtendedHeat.command_byte(), 0x06);
        assert_eq!(PresetMode::Memory3.command_byte(), 0x22);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("heat".parse::<OperatingMode>().unwrap(), OperatingMode::Heat);
        assert_eq!("ext_ht".parse::<PresetMode>().unwrap(), PresetMode::ExtendedHeat);
        assert_eq!("m2".parse::<PresetMode>().unwrap(), PresetMode::Memory2);
        assert_eq!("medium".parse::<FanLevel>().unwrap(), FanLevel::Medium);
        assert_eq!(PresetMode::Memory1.to_string(), "m1");

        assert!(matches!(
            "turbo".parse::<OperatingMode>(),
            Err(Error::UnknownMode(name)) if name == "turbo"
        ));
        assert!(matches!("auto".parse::<PresetMode>(), Err(Error::UnknownMode(_))));
    }

    #[test]
    fn test_fan_level_from_percent() {
        assert_eq!(FanLevel::from_percent(Some(0)), Some(FanLevel::Min));
        assert_eq!(FanLevel::from_percent(Some(10)), Some(FanLevel::Min));
        assert_eq!(FanLevel::from_percent(Some(11)), Some(FanLevel::Low));
        assert_eq!(FanLevel::from_percent(Some(50)), Some(FanLevel::Medium));
        assert_eq!(FanLevel::from_percent(Some(75)), Some(FanLevel::High));
        assert_eq!(FanLevel::from_percent(Some(100)), Some(FanLevel::Max));
        assert_eq!(FanLevel::from_percent(Some(101)), None);
        assert_eq!(FanLevel::from_percent(None), None);
    }
}
