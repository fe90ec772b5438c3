//! Application configuration
//!
//! Loaded from a TOML file (by default `config.toml` in the platform config
//! directory) and validated once, before any I/O happens.
//!
//! ```toml
//! [control]
//! server_url = "http://127.0.0.1:8080"
//! device_id = "audio"
//! device_token = "..."
//!
//! [stream]
//! topic = "go_stream_1"
//! media_kind = "audio"
//!
//! [capture]
//! device = "USB Microphone"
//!
//! [encoder]
//! program = "ffmpeg"
//! rtp_host = "127.0.0.1"
//!
//! [encoder.audio]
//! bitrate = "64k"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_SHUTDOWN_GRACE_MS, REGISTER_PATH};
use crate::error::ConfigError;
use crate::protocol::MediaKind;

/// Complete streamer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub control: ControlConfig,
    pub stream: StreamConfig,
    pub capture: CaptureConfig,
    pub encoder: EncoderConfig,
}

/// Control-plane endpoint and device credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Base URL of the control plane, e.g. `http://127.0.0.1:8080`
    pub server_url: String,
    pub device_id: String,
    pub device_token: String,
    /// Timeout for the single registration attempt
    pub request_timeout_secs: Option<u64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            device_id: String::new(),
            device_token: String::new(),
            request_timeout_secs: Some(10),
        }
    }
}

impl ControlConfig {
    /// Full URL of the registration endpoint
    pub fn register_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        if base.ends_with(REGISTER_PATH) {
            base.to_string()
        } else {
            format!("{base}{REGISTER_PATH}")
        }
    }
}

/// Stream identity sent during registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub topic: String,
    pub media_kind: MediaKind,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            topic: "go_stream_1".to_string(),
            media_kind: MediaKind::Audio,
        }
    }
}

/// Capture device selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; the system default input when unset
    pub device: Option<String>,
}

/// Destination URL scheme handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationScheme {
    #[default]
    Rtp,
    Udp,
}

impl DestinationScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            DestinationScheme::Rtp => "rtp",
            DestinationScheme::Udp => "udp",
        }
    }
}

/// Encoder process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable, looked up on `PATH` when not absolute
    pub program: String,
    /// Host the encoder sends RTP to
    pub rtp_host: String,
    pub scheme: DestinationScheme,
    /// Also embed the SSRC as a `?ssrc=` query on the destination URL
    pub ssrc_in_url: bool,
    /// Add the no-buffer / low-delay / zero mux-delay flags
    pub low_latency: bool,
    /// Encoder's own log verbosity (`-loglevel`)
    pub log_level: String,
    /// How long to wait for a clean exit before killing the encoder
    pub shutdown_grace_ms: u64,
    pub audio: AudioProfile,
    pub video: VideoProfile,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            rtp_host: "127.0.0.1".to_string(),
            scheme: DestinationScheme::Rtp,
            ssrc_in_url: false,
            low_latency: true,
            log_level: "warning".to_string(),
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            audio: AudioProfile::default(),
            video: VideoProfile::default(),
        }
    }
}

/// Audio codec profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProfile {
    pub codec: String,
    pub bitrate: String,
    pub vbr: bool,
    /// 0 (fastest) to 10 (best quality)
    pub compression_level: u8,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            codec: "libopus".to_string(),
            bitrate: "64k".to_string(),
            vbr: true,
            compression_level: 10,
        }
    }
}

/// Video codec profile, only used for file playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoProfile {
    pub codec: String,
    pub pix_fmt: String,
    pub preset: String,
    pub tune: String,
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            pix_fmt: "yuv420p".to_string(),
            preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
        }
    }
}

/// Command-line and environment values that win over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub device_id: Option<String>,
    pub device_token: Option<String>,
    pub topic: Option<String>,
    pub media_kind: Option<MediaKind>,
    pub capture_device: Option<String>,
}

impl StreamerConfig {
    pub fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            server_url,
            device_id,
            device_token,
            topic,
            media_kind,
            capture_device,
        } = overrides;

        if let Some(v) = server_url {
            self.control.server_url = v;
        }
        if let Some(v) = device_id {
            self.control.device_id = v;
        }
        if let Some(v) = device_token {
            self.control.device_token = v;
        }
        if let Some(v) = topic {
            self.stream.topic = v;
        }
        if let Some(v) = media_kind {
            self.stream.media_kind = v;
        }
        if capture_device.is_some() {
            self.capture.device = capture_device;
        }
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rtp-ingest-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used when present, otherwise compiled defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => {
                    tracing::debug!("Loading config from {}", path.display());
                    Self::from_file(&path)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Check every field the pipeline depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_control()?;
        if self.stream.topic.trim().is_empty() {
            return Err(ConfigError::Missing("stream.topic"));
        }
        self.validate_encoder()
    }

    /// Checks needed when the stream is not registered with a control plane
    pub fn validate_encoder(&self) -> Result<(), ConfigError> {
        let enc = &self.encoder;
        if enc.program.trim().is_empty() {
            return Err(ConfigError::Missing("encoder.program"));
        }
        if enc.rtp_host.trim().is_empty() {
            return Err(ConfigError::Missing("encoder.rtp_host"));
        }
        if enc.audio.bitrate.trim().is_empty() {
            return Err(ConfigError::Missing("encoder.audio.bitrate"));
        }
        if enc.audio.compression_level > 10 {
            return Err(ConfigError::Invalid {
                field: "encoder.audio.compression_level",
                reason: format!("{} is outside 0..=10", enc.audio.compression_level),
            });
        }
        Ok(())
    }

    fn validate_control(&self) -> Result<(), ConfigError> {
        let ctl = &self.control;
        if ctl.device_id.trim().is_empty() {
            return Err(ConfigError::Missing("control.device_id"));
        }
        if ctl.device_token.trim().is_empty() {
            return Err(ConfigError::Missing("control.device_token"));
        }
        if !(ctl.server_url.starts_with("http://") || ctl.server_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "control.server_url",
                reason: format!("`{}` is not an http(s) URL", ctl.server_url),
            });
        }
        Ok(())
    }
}
