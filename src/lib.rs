//! # RTP Ingest Streamer
//!
//! Captures live audio, hands it to an external encoder process and lets that
//! process packetize it as RTP towards a media-ingest endpoint.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              STREAMER                                    │
//! │                                                                          │
//! │  ┌───────────────────────┐   POST /api/streams/register                  │
//! │  │ Registration Client   │ ─────────────────────────────► Control plane  │
//! │  │ (network::registration)│ ◄───────────── {ssrc, rtp_port}              │
//! │  └───────────┬───────────┘                                               │
//! │              │ StreamRegistration                                        │
//! │              ▼                                                           │
//! │  ┌───────────────────────┐        ┌──────────────────────────────┐       │
//! │  │ Encoder Invocation    │ spawn  │ Encoder process (ffmpeg)     │       │
//! │  │ (encoder::invocation) │ ─────► │  stdin: s16le mono PCM       │ ──► RTP/UDP
//! │  └───────────────────────┘        │  stderr ─► tracing           │       │
//! │                                   └──────────────▲───────────────┘       │
//! │                                                  │ pipe (backpressure)   │
//! │  ┌───────────────────────┐        ┌──────────────┴───────────────┐       │
//! │  │ Capture Source        │ frame  │ Streaming Loop               │       │
//! │  │ (audio::capture/file) │ ─────► │ (pipeline::session)          │       │
//! │  └───────────────────────┘        │  serialize LE ─► write       │       │
//! │                                   └──────────────────────────────┘       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod encoder;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Frame delivery rate; one frame every 20 ms
    pub const FRAMES_PER_SECOND: u32 = 50;

    /// Lowest rate whose 20 ms frame still holds one sample
    pub const MIN_SAMPLE_RATE: u32 = FRAMES_PER_SECOND / 2;

    /// Captured audio is always delivered to the encoder as mono
    pub const CAPTURE_CHANNELS: u16 = 1;

    /// Bytes per serialized sample (s16le)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// RTP payload type used for audio streams
    pub const AUDIO_PAYLOAD_TYPE: u8 = 96;

    /// RTP payload type used for video streams
    pub const VIDEO_PAYLOAD_TYPE: u8 = 102;

    /// Frames buffered between the capture thread and the streaming loop
    pub const CAPTURE_QUEUE_FRAMES: usize = 16;

    /// Default wait for the encoder to exit after its input is closed
    pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

    /// Registration endpoint path on the control plane
    pub const REGISTER_PATH: &str = "/api/streams/register";
}

/// Process exit codes used by the binaries
pub mod exit_codes {
    /// Clean shutdown: interrupt or end of input
    pub const CLEAN: u8 = 0;

    /// Failure after the pipeline started
    pub const RUNTIME: u8 = 1;

    pub const CONFIG: u8 = 2;
    pub const REGISTRATION: u8 = 3;
    pub const DEVICE_OPEN: u8 = 4;
    pub const ENCODER_SPAWN: u8 = 5;
}
