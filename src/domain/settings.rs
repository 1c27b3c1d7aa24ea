use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::session::SessionConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "bedjet".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Appliance to drive when none is given on the command line
    #[serde(default)]
    pub device_address: Option<String>,

    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE layout of the appliance
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_status_uuid")]
    pub ble_status_char_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub ble_command_char_uuid: String,

    // Retry behaviour
    #[serde(default = "default_max_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_subscribe_attempts: u32,
    /// Upper bound for a single connect/subscribe call; `null` waits forever
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_address: None,
            log_settings: LogSettings::default(),
            ble_service_uuid: default_service_uuid(),
            ble_status_char_uuid: default_status_uuid(),
            ble_command_char_uuid: default_command_uuid(),
            max_connect_attempts: default_max_attempts(),
            max_subscribe_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            auto_reconnect: default_true(),
        }
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_status_uuid() -> String {
    protocol::STATUS_CHAR_UUID.to_string()
}
fn default_command_uuid() -> String {
    protocol::COMMAND_CHAR_UUID.to_string()
}
fn default_max_attempts() -> u32 {
    10
}
fn default_attempt_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Settings {
    /// Build the session configuration, validating the configured UUIDs.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let parse = |name: &str, value: &str| {
            Uuid::parse_str(value).with_context(|| format!("invalid {name} '{value}'"))
        };

        Ok(SessionConfig {
            service_uuid: parse("ble_service_uuid", &self.ble_service_uuid)?,
            status_characteristic: parse("ble_status_char_uuid", &self.ble_status_char_uuid)?,
            command_characteristic: parse("ble_command_char_uuid", &self.ble_command_char_uuid)?,
            max_connect_attempts: self.max_connect_attempts.max(1),
            max_subscribe_attempts: self.max_subscribe_attempts.max(1),
            attempt_timeout: self.attempt_timeout_secs.map(Duration::from_secs),
            auto_reconnect: self.auto_reconnect,
        })
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load from an explicit path. A missing or unreadable file yields defaults.
    pub fn load_from(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {:#}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BedJetController");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Remember the appliance address for the next run.
    pub fn set_device_address(&mut self, address: &str) -> anyhow::Result<()> {
        if self.settings.device_address.as_deref() != Some(address) {
            self.settings.device_address = Some(address.to_string());
            self.save()?;
        }
        Ok(())
    }
}
