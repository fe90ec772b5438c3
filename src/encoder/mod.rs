//! External encoder process management
//!
//! The encoder (ffmpeg by default) owns codec work and RTP packetization.
//! This module only builds its command line, feeds it, and tears it down.

pub mod invocation;
pub mod process;

pub use invocation::{EncoderInput, EncoderInvocation, RtpDestination, StreamTarget};
pub use process::{EncoderExit, EncoderLauncher, EncoderSink, ProcessEncoder, ProcessLauncher};
