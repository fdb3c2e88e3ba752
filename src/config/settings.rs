//! # Host Settings
//!
//! Handles loading and validating the static runtime settings from a TOML file.
//!
//! These settings describe the host the tracker runs on (storage root, serial
//! devices, timeouts) and the first-boot defaults for the device [`Config`].
//! They are read once at startup and never written back.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::Config;
use crate::error::{Result, TrackerError};

/// Main settings structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub receiver: ReceiverSettings,
    #[serde(default)]
    pub console: ConsoleSettings,
    #[serde(default)]
    pub upload: UploadSettings,
    #[serde(default)]
    pub power: PowerSettings,
    #[serde(default)]
    pub device: DeviceSettings,
}

/// Storage layout and limits
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// In-memory buffer capacity in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Permanent log rotation threshold in bytes
    #[serde(default = "default_log_roll_size")]
    pub log_roll_size: u64,
}

/// Positioning receiver settings
#[derive(Debug, Deserialize, Clone)]
pub struct ReceiverSettings {
    /// Serial device delivering the fix feed (empty = no receiver)
    #[serde(default = "default_receiver_port")]
    pub port: String,

    #[serde(default = "default_receiver_baud_rate")]
    pub baud_rate: u32,

    /// Receiver output cadence in seconds
    #[serde(default = "default_fix_interval_s")]
    pub fix_interval_s: u32,

    /// Force a receiver reset after this long without a usable fix
    #[serde(default = "default_no_fix_timeout_s")]
    pub no_fix_timeout_s: u32,
}

/// Serial command console settings
#[derive(Debug, Deserialize, Clone)]
pub struct ConsoleSettings {
    #[serde(default = "default_console_enabled")]
    pub enabled: bool,

    #[serde(default = "default_console_port")]
    pub port: String,

    #[serde(default = "default_console_baud_rate")]
    pub baud_rate: u32,
}

/// Upload transport and retry settings
#[derive(Debug, Deserialize, Clone)]
pub struct UploadSettings {
    /// Pause after a failed upload attempt
    #[serde(default = "default_retry_delay_s")]
    pub retry_delay_s: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Power key and lifecycle settings
#[derive(Debug, Deserialize, Clone)]
pub struct PowerSettings {
    /// evdev device reporting the power key (empty = disabled)
    #[serde(default)]
    pub key_device: String,

    /// Delay before a commanded power off / reboot
    #[serde(default = "default_action_delay_ms")]
    pub action_delay_ms: u64,

    /// Delay before the restart that follows a full wipe
    #[serde(default = "default_wipe_restart_delay_ms")]
    pub wipe_restart_delay_ms: u64,
}

/// Device identity and first-boot configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSettings {
    #[serde(default = "default_imei")]
    pub imei: String,

    #[serde(default)]
    pub defaults: Config,
}

// Default value functions
fn default_storage_root() -> String { "./data".to_string() }
fn default_buffer_capacity() -> usize { 1024 }
fn default_log_roll_size() -> u64 { 256 * 1024 }

fn default_receiver_port() -> String { String::new() }
fn default_receiver_baud_rate() -> u32 { 115200 }
fn default_fix_interval_s() -> u32 { 10 }
fn default_no_fix_timeout_s() -> u32 { 600 }

fn default_console_enabled() -> bool { false }
fn default_console_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_console_baud_rate() -> u32 { 921600 }

fn default_retry_delay_s() -> u32 { 60 }
fn default_connect_timeout_ms() -> u64 { 30_000 }
fn default_send_timeout_ms() -> u64 { 10_000 }

fn default_action_delay_ms() -> u64 { 5000 }
fn default_wipe_restart_delay_ms() -> u64 { 6000 }

fn default_imei() -> String { "000000000000000".to_string() }

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            buffer_capacity: default_buffer_capacity(),
            log_roll_size: default_log_roll_size(),
        }
    }
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            port: default_receiver_port(),
            baud_rate: default_receiver_baud_rate(),
            fix_interval_s: default_fix_interval_s(),
            no_fix_timeout_s: default_no_fix_timeout_s(),
        }
    }
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_console_enabled(),
            port: default_console_port(),
            baud_rate: default_console_baud_rate(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            retry_delay_s: default_retry_delay_s(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for PowerSettings {
    fn default() -> Self {
        Self {
            key_device: String::new(),
            action_delay_ms: default_action_delay_ms(),
            wipe_restart_delay_ms: default_wipe_restart_delay_ms(),
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            imei: default_imei(),
            defaults: Config::default(),
        }
    }
}

impl ReceiverSettings {
    /// Number of raw records without a fix that triggers a receiver reset.
    pub fn no_fix_limit(&self) -> u32 {
        self.no_fix_timeout_s / self.fix_interval_s.max(1)
    }
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_tracker::config::settings::Settings;
    ///
    /// let settings = Settings::load("config/tracker.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load settings from a file if it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let settings = Self::default();
            settings.validate()?;
            Ok(settings)
        }
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate setting values
    ///
    /// # Errors
    ///
    /// Returns error if any value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.storage.root.is_empty() {
            return Err(invalid("storage root cannot be empty"));
        }

        if self.storage.buffer_capacity < 128 || self.storage.buffer_capacity > 64 * 1024 {
            return Err(invalid("buffer_capacity must be between 128 and 65536"));
        }

        if self.storage.log_roll_size < self.storage.buffer_capacity as u64 {
            return Err(invalid("log_roll_size must be at least buffer_capacity"));
        }

        if self.receiver.fix_interval_s == 0 || self.receiver.fix_interval_s > 3600 {
            return Err(invalid("fix_interval_s must be between 1 and 3600"));
        }

        if self.receiver.no_fix_timeout_s < self.receiver.fix_interval_s {
            return Err(invalid("no_fix_timeout_s must be at least fix_interval_s"));
        }

        if self.console.enabled && self.console.port.is_empty() {
            return Err(invalid("console port cannot be empty when enabled"));
        }

        if self.upload.retry_delay_s == 0 {
            return Err(invalid("retry_delay_s must be greater than 0"));
        }

        if self.upload.connect_timeout_ms == 0 || self.upload.connect_timeout_ms > 300_000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 300000"));
        }

        if self.upload.send_timeout_ms == 0 || self.upload.send_timeout_ms > 300_000 {
            return Err(invalid("send_timeout_ms must be between 1 and 300000"));
        }

        if self.power.action_delay_ms > 60_000 {
            return Err(invalid("action_delay_ms must be at most 60000"));
        }

        if self.device.imei.is_empty() || !self.device.imei.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("imei must be a non-empty string of digits"));
        }

        if self.device.defaults.gps_interval == 0 || self.device.defaults.upload_interval == 0 {
            return Err(invalid("default gps and upload intervals must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.storage.buffer_capacity, 1024);
        assert_eq!(settings.storage.log_roll_size, 262144);
        assert_eq!(settings.receiver.no_fix_limit(), 60);
    }

    #[test]
    fn test_load_settings_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[storage]
root = "/mnt/sd"

[receiver]
port = "/dev/ttyS1"

[device]
imei = "123456789012345"

[device.defaults]
apn = "everywhere"
server = "collector.example.org"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let settings = Settings::load(temp_file.path()).unwrap();
        assert_eq!(settings.storage.root, "/mnt/sd");
        assert_eq!(settings.device.defaults.apn, "everywhere");
        assert_eq!(settings.device.defaults.apn_user, "wap");
        assert_eq!(settings.device.defaults.port, 8181);
        assert_eq!(settings.upload.retry_delay_s, 60);
    }

    #[test]
    fn test_shipped_settings_match_defaults() {
        let settings = Settings::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/tracker.toml")).unwrap();
        assert_eq!(settings.storage.buffer_capacity, 1024);
        assert_eq!(settings.console.baud_rate, 921600);
        assert_eq!(settings.device.defaults, Config::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load_or_default("/nonexistent/tracker.toml").unwrap();
        assert_eq!(settings.storage.root, "./data");
    }

    #[test]
    fn test_empty_storage_root() {
        let mut settings = Settings::default();
        settings.storage.root = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_buffer_capacity_bounds() {
        let mut settings = Settings::default();
        settings.storage.buffer_capacity = 64;
        assert!(settings.validate().is_err());
        settings.storage.buffer_capacity = 128 * 1024;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_roll_size_below_capacity() {
        let mut settings = Settings::default();
        settings.storage.log_roll_size = 512;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_fix_interval_zero() {
        let mut settings = Settings::default();
        settings.receiver.fix_interval_s = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_console_enabled_without_port() {
        let mut settings = Settings::default();
        settings.console.enabled = true;
        settings.console.port = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_retry_delay_zero() {
        let mut settings = Settings::default();
        settings.upload.retry_delay_s = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_connect_timeout_too_high() {
        let mut settings = Settings::default();
        settings.upload.connect_timeout_ms = 300_001;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_imei() {
        let mut settings = Settings::default();
        settings.device.imei = "12ab".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = Settings::from_toml("[storage\nroot = 1");
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }
}
