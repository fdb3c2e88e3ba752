//! # Configuration Module
//!
//! Two layers of configuration:
//!
//! - [`settings::Settings`]: static host settings loaded from a TOML file at startup.
//! - [`Config`]: the device configuration (network credentials, collector address,
//!   intervals, log mask, screen timeout). It is persisted as `key: value` lines,
//!   loaded once at boot and rewritten on every mutation by [`ConfigStore`].
//!
//! ## Device Configuration File Format
//!
//! ```text
//! apn: pp.vodafone.co.uk
//! apnuser: wap
//! apnpwd: wap
//! gps: 30
//! upload: 300
//! server: tracker.example.org
//! serverip:
//! port: 8181
//! log: 7
//! screentime: 60
//! ```
//!
//! Unknown keys are ignored. Numeric values that do not parse keep their previous value.

pub mod settings;

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::storage::Storage;

/// Device configuration file name under the storage root
pub const CONFIG_FILE_NAME: &str = "config.txt";

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Access point name for the data session
    #[serde(default = "default_apn")]
    pub apn: String,

    #[serde(default = "default_apn_user")]
    pub apn_user: String,

    #[serde(default = "default_apn_password")]
    pub apn_password: String,

    /// Store a sample every N seconds
    #[serde(default = "default_gps_interval")]
    pub gps_interval: u32,

    /// Upload buffered data every N seconds
    #[serde(default = "default_upload_interval")]
    pub upload_interval: u32,

    /// Collector host name
    #[serde(default)]
    pub server: String,

    /// Resolved collector address, empty until resolved
    #[serde(default)]
    pub server_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Log verbosity mask (see [`crate::logging`])
    #[serde(default = "default_log_level")]
    pub log_level: u8,

    /// Turn the display off after N seconds
    #[serde(default = "default_screen_time")]
    pub screen_time: u32,
}

fn default_apn() -> String { "pp.vodafone.co.uk".to_string() }
fn default_apn_user() -> String { "wap".to_string() }
fn default_apn_password() -> String { "wap".to_string() }
fn default_gps_interval() -> u32 { 30 }
fn default_upload_interval() -> u32 { 300 }
fn default_port() -> u16 { 8181 }
fn default_log_level() -> u8 { 7 }
fn default_screen_time() -> u32 { 60 }

impl Default for Config {
    fn default() -> Self {
        Self {
            apn: default_apn(),
            apn_user: default_apn_user(),
            apn_password: default_apn_password(),
            gps_interval: default_gps_interval(),
            upload_interval: default_upload_interval(),
            server: String::new(),
            server_ip: String::new(),
            port: default_port(),
            log_level: default_log_level(),
            screen_time: default_screen_time(),
        }
    }
}

impl Config {
    /// Parses `key: value` lines on top of `base`.
    ///
    /// Unknown keys and lines without a separator are skipped.
    pub fn parse(text: &str, base: Config) -> Config {
        let mut config = base;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "apn" => config.apn = value.to_string(),
                "apnuser" => config.apn_user = value.to_string(),
                "apnpwd" => config.apn_password = value.to_string(),
                "gps" => parse_number(key, value, &mut config.gps_interval),
                "upload" => parse_number(key, value, &mut config.upload_interval),
                "server" => config.server = value.to_string(),
                "serverip" => config.server_ip = value.to_string(),
                "port" => parse_number(key, value, &mut config.port),
                "log" => parse_number(key, value, &mut config.log_level),
                "screentime" => parse_number(key, value, &mut config.screen_time),
                other => debug!("Ignoring unknown config key '{}'", other),
            }
        }

        config
    }

    /// Renders the configuration as `key: value` lines.
    pub fn render(&self) -> String {
        let mut text = String::with_capacity(256);
        let _ = writeln!(text, "apn: {}", self.apn);
        let _ = writeln!(text, "apnuser: {}", self.apn_user);
        let _ = writeln!(text, "apnpwd: {}", self.apn_password);
        let _ = writeln!(text, "gps: {}", self.gps_interval);
        let _ = writeln!(text, "upload: {}", self.upload_interval);
        let _ = writeln!(text, "server: {}", self.server);
        let _ = writeln!(text, "serverip: {}", self.server_ip);
        let _ = writeln!(text, "port: {}", self.port);
        let _ = writeln!(text, "log: {}", self.log_level);
        let _ = writeln!(text, "screentime: {}", self.screen_time);
        text
    }
}

fn parse_number<T: std::str::FromStr + std::fmt::Display>(key: &str, value: &str, slot: &mut T) {
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("Invalid value '{}' for '{}', keeping {}", value, key, slot),
    }
}

/// Shared, read-mostly handle to the device configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Returns a copy of the current configuration.
    pub fn get(&self) -> Config {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Mutates the configuration in place and returns the updated copy.
    pub fn update<F: FnOnce(&mut Config)>(&self, f: F) -> Config {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
        guard.clone()
    }
}

/// Loads and persists the device configuration file.
pub struct ConfigStore {
    storage: Arc<dyn Storage>,
    handle: ConfigHandle,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("config", &self.handle.get())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn Storage>, handle: ConfigHandle) -> Self {
        Self { storage, handle }
    }

    /// Shared configuration handle.
    pub fn handle(&self) -> &ConfigHandle {
        &self.handle
    }

    /// Loads the configuration at boot.
    ///
    /// If the file is missing or unreadable, `defaults` are installed and written
    /// back immediately.
    ///
    /// # Errors
    ///
    /// Returns error only if the file can neither be read nor created. This is the
    /// fatal boot failure case.
    pub fn load_or_bootstrap(&self, defaults: Config) -> Result<Config> {
        match self.storage.read(CONFIG_FILE_NAME) {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                let text = String::from_utf8_lossy(&bytes);
                let config = Config::parse(&text, defaults);
                info!(
                    "Config loaded: server {} APN {} user {} GPS every {}s, upload every {}s, log {}",
                    config.server, config.apn, config.apn_user,
                    config.gps_interval, config.upload_interval, config.log_level
                );
                self.handle.update(|c| *c = config.clone());
                return Ok(config);
            }
            Ok(_) => info!("No device config found, writing defaults"),
            Err(e) => warn!("Unable to read {}: {}", CONFIG_FILE_NAME, e),
        }

        self.handle.update(|c| *c = defaults.clone());
        self.persist().map_err(|e| {
            TrackerError::ConfigFormat(format!("cannot create default {}: {}", CONFIG_FILE_NAME, e))
        })?;
        Ok(defaults)
    }

    /// Writes the current configuration to storage.
    pub fn persist(&self) -> Result<()> {
        let text = self.handle.get().render();
        debug!("Update config file {}", CONFIG_FILE_NAME);
        self.storage.write_atomic(CONFIG_FILE_NAME, text.as_bytes())
    }
}
