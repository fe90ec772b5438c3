//! Encoder command-line construction
//!
//! Every flag handed to the encoder is derived from an [`EncoderInvocation`],
//! which in turn is built from configuration plus the negotiated SSRC/port.
//! The raw input format declared here (`s16le`, native rate, mono) must
//! match [`crate::audio::AudioFrame::write_le`].

use std::fmt;
use std::path::PathBuf;

use crate::audio::CaptureFormat;
use crate::config::{AudioProfile, DestinationScheme, EncoderConfig, VideoProfile};
use crate::constants::CAPTURE_CHANNELS;
use crate::protocol::{MediaKind, StreamRegistration};

/// What the encoder reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInput {
    /// Raw s16le PCM on stdin
    RawPcm {
        sample_rate: u32,
        channels: u16,
        /// Consume input at its native rate (`-re`), for non-live sources
        realtime: bool,
    },
    /// A media file the encoder opens itself, always read in real time
    MediaFile { path: PathBuf },
}

impl EncoderInput {
    pub fn uses_stdin(&self) -> bool {
        matches!(self, EncoderInput::RawPcm { .. })
    }
}

/// Port and optional SSRC the stream is sent with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTarget {
    pub port: u16,
    pub ssrc: Option<u32>,
}

impl From<StreamRegistration> for StreamTarget {
    fn from(reg: StreamRegistration) -> Self {
        Self {
            port: reg.rtp_port,
            ssrc: Some(reg.ssrc),
        }
    }
}

impl StreamTarget {
    /// Statically configured destination without a negotiated SSRC
    pub fn unregistered(port: u16) -> Self {
        Self { port, ssrc: None }
    }
}

/// `rtp://host:port` style destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpDestination {
    pub scheme: DestinationScheme,
    pub host: String,
    pub port: u16,
    /// Embedded as `?ssrc=` when set
    pub ssrc_query: Option<u32>,
}

impl fmt::Display for RtpDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)?;
        if let Some(ssrc) = self.ssrc_query {
            write!(f, "?ssrc={ssrc}")?;
        }
        Ok(())
    }
}

/// Full parameter set for one encoder process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub program: String,
    pub kind: MediaKind,
    pub input: EncoderInput,
    pub destination: RtpDestination,
    /// Passed as unsigned decimal. Encoders that parse `-ssrc` as a signed
    /// 32-bit option reject values above `i32::MAX`; see
    /// [`EncoderInvocation::ssrc_exceeds_i32`].
    pub ssrc: Option<u32>,
    pub payload_type: u8,
    pub audio: AudioProfile,
    pub video: VideoProfile,
    pub low_latency: bool,
    pub log_level: String,
}

impl EncoderInvocation {
    /// Invocation for live (or raw file) audio fed through stdin
    pub fn for_capture(
        config: &EncoderConfig,
        target: impl Into<StreamTarget>,
        format: CaptureFormat,
        realtime: bool,
    ) -> Self {
        let input = EncoderInput::RawPcm {
            sample_rate: format.sample_rate,
            channels: CAPTURE_CHANNELS,
            realtime,
        };
        Self::build(config, MediaKind::Audio, input, target.into())
    }

    /// Invocation for a media file the encoder reads directly
    pub fn for_media_file(
        config: &EncoderConfig,
        kind: MediaKind,
        path: impl Into<PathBuf>,
        target: impl Into<StreamTarget>,
    ) -> Self {
        let input = EncoderInput::MediaFile { path: path.into() };
        Self::build(config, kind, input, target.into())
    }

    fn build(
        config: &EncoderConfig,
        kind: MediaKind,
        input: EncoderInput,
        target: StreamTarget,
    ) -> Self {
        let destination = RtpDestination {
            scheme: config.scheme,
            host: config.rtp_host.clone(),
            port: target.port,
            ssrc_query: if config.ssrc_in_url { target.ssrc } else { None },
        };
        let invocation = Self {
            program: config.program.clone(),
            kind,
            input,
            destination,
            ssrc: target.ssrc,
            payload_type: kind.payload_type(),
            audio: config.audio.clone(),
            video: config.video.clone(),
            low_latency: config.low_latency,
            log_level: config.log_level.clone(),
        };
        if invocation.ssrc_exceeds_i32() {
            tracing::warn!(
                "SSRC {} is above {}; an encoder that reads -ssrc as a signed 32-bit value will refuse to start",
                target.ssrc.unwrap_or_default(),
                i32::MAX
            );
        }
        invocation
    }

    /// The SSRC does not fit a signed 32-bit integer
    pub fn ssrc_exceeds_i32(&self) -> bool {
        self.ssrc.is_some_and(|ssrc| i32::try_from(ssrc).is_err())
    }

    /// Command-line arguments, program excluded
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::with_capacity(48);

        push(&mut args, &["-hide_banner", "-loglevel", self.log_level.as_str()]);

        match &self.input {
            EncoderInput::RawPcm {
                sample_rate,
                channels,
                realtime,
            } => {
                if self.low_latency {
                    push(
                        &mut args,
                        &["-fflags", "nobuffer", "-probesize", "32", "-analyzeduration", "0"],
                    );
                }
                if *realtime {
                    push(&mut args, &["-re"]);
                }
                let rate = sample_rate.to_string();
                let channels = channels.to_string();
                push(
                    &mut args,
                    &["-f", "s16le", "-ar", rate.as_str(), "-ac", channels.as_str(), "-i", "pipe:0"],
                );
            }
            EncoderInput::MediaFile { path } => {
                push(&mut args, &["-nostdin"]);
                if self.low_latency {
                    push(&mut args, &["-fflags", "nobuffer"]);
                }
                let path = path.to_string_lossy().into_owned();
                push(&mut args, &["-re", "-i", path.as_str()]);
            }
        }

        match self.kind {
            MediaKind::Audio => {
                push(&mut args, &["-vn"]);
                if matches!(self.input, EncoderInput::MediaFile { .. }) {
                    push(&mut args, &["-map", "0:a:0"]);
                }
                let a = &self.audio;
                let level = a.compression_level.to_string();
                push(
                    &mut args,
                    &[
                        "-c:a",
                        a.codec.as_str(),
                        "-b:a",
                        a.bitrate.as_str(),
                        "-vbr",
                        if a.vbr { "on" } else { "off" },
                        "-compression_level",
                        level.as_str(),
                    ],
                );
            }
            MediaKind::Video => {
                let v = &self.video;
                push(
                    &mut args,
                    &[
                        "-an",
                        "-map",
                        "0:v:0",
                        "-c:v",
                        v.codec.as_str(),
                        "-pix_fmt",
                        v.pix_fmt.as_str(),
                        "-preset",
                        v.preset.as_str(),
                        "-tune",
                        v.tune.as_str(),
                    ],
                );
            }
        }

        if self.low_latency {
            push(&mut args, &["-flags", "low_delay", "-flush_packets", "1", "-muxdelay", "0"]);
        }

        let payload_type = self.payload_type.to_string();
        push(&mut args, &["-payload_type", payload_type.as_str()]);
        if let Some(ssrc) = self.ssrc {
            // Unsigned decimal, never the i32 reinterpretation
            let ssrc = ssrc.to_string();
            push(&mut args, &["-ssrc", ssrc.as_str()]);
        }
        let destination = self.destination.to_string();
        push(&mut args, &["-f", "rtp", destination.as_str()]);

        args
    }

    /// Human-readable command line for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}
