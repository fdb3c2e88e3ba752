//! # Error Types
//!
//! Custom error types for the tracker using `thiserror`.

use thiserror::Error;

/// Main error type for the tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// TOML settings errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Device configuration file (key: value) errors
    #[error("Device configuration error: {0}")]
    ConfigFormat(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON snapshot / fix feed errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No serial port could be opened
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// Connect/send failures on the upload transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network stack request failures
    #[error("Network error: {0}")]
    Network(String),

    /// Positioning receiver control failures
    #[error("Receiver error: {0}")]
    Receiver(String),

    /// Power key input errors
    #[error("Input error: {0}")]
    Input(String),

    /// A task channel was closed
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Result type alias for the tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
