//! Error types for the streaming pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this failure.
    ///
    /// `0` is reserved for clean shutdown and `1` for failures after the
    /// pipeline started; see [`crate::exit_codes`].
    pub fn exit_code(&self) -> u8 {
        use crate::exit_codes::*;
        match self {
            Error::Config(_) => CONFIG,
            Error::Registration(RegistrationError::InvalidInput(_)) => CONFIG,
            Error::Registration(_) => REGISTRATION,
            Error::Audio(_) => DEVICE_OPEN,
            Error::Encoder(EncoderError::SpawnFailed { .. })
            | Error::Encoder(EncoderError::MissingPipe(_)) => ENCODER_SPAWN,
            Error::Encoder(_) | Error::Io(_) => RUNTIME,
        }
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Control-plane registration errors
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Invalid registration input: {0}")]
    InvalidInput(&'static str),

    #[error("Request to control plane failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server returned non-OK status {status}; response body: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed registration response ({source}); response body: {body}")]
    Malformed {
        source: serde_json::Error,
        body: String,
    },
}

/// Audio capture errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Capture thread terminated unexpectedly")]
    Disconnected,

    #[error("Capture IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::DeviceNotFound(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

/// Encoder subprocess errors
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Failed to start encoder `{program}`: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("Encoder process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Write to encoder input failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("Waiting for encoder exit failed: {0}")]
    Wait(#[source] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
