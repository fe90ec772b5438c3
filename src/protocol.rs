//! Control-plane wire types
//!
//! JSON bodies exchanged with the registration endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{AUDIO_PAYLOAD_TYPE, VIDEO_PAYLOAD_TYPE};

/// Kind of media carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// RTP payload type tag used for this kind
    pub fn payload_type(self) -> u8 {
        match self {
            MediaKind::Audio => AUDIO_PAYLOAD_TYPE,
            MediaKind::Video => VIDEO_PAYLOAD_TYPE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// Body of `POST /api/streams/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub topic: String,
    /// Omitted entirely for the minimal file-test registration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaKind>,
}

impl RegisterRequest {
    pub fn new(topic: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            topic: topic.into(),
            media_type: Some(kind),
        }
    }

    /// Request without a media type
    pub fn untyped(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            media_type: None,
        }
    }
}

/// Transport parameters assigned by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRegistration {
    pub ssrc: u32,
    pub rtp_port: u16,
}
