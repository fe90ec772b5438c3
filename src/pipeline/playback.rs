//! File playback: the encoder reads a media file itself
//!
//! No capture source is involved; the session only waits for the encoder
//! to finish or for a stop request, and always shuts the encoder down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::encoder::{EncoderExit, EncoderSink};
use crate::error::EncoderError;
use crate::exit_codes;

/// Why playback ended
#[derive(Debug)]
pub enum PlaybackEnd {
    /// The encoder exited on its own
    Finished,
    /// A stop was requested
    Stopped,
    /// Polling the encoder failed
    WaitFailed(EncoderError),
}

#[derive(Debug)]
pub struct PlaybackReport {
    pub end: PlaybackEnd,
    pub encoder: EncoderExit,
}

impl PlaybackReport {
    pub fn exit_code(&self) -> u8 {
        match self.end {
            PlaybackEnd::Stopped => exit_codes::CLEAN,
            PlaybackEnd::Finished if self.encoder.success => exit_codes::CLEAN,
            PlaybackEnd::Finished | PlaybackEnd::WaitFailed(_) => exit_codes::RUNTIME,
        }
    }
}

/// Shuts the encoder down if playback unwinds before doing so
struct EncoderGuard<E: EncoderSink>(Option<E>);

impl<E: EncoderSink> Drop for EncoderGuard<E> {
    fn drop(&mut self) {
        if let Some(encoder) = self.0.take() {
            encoder.shutdown();
        }
    }
}

/// Wait for the encoder, polling `stop` every `poll` interval
pub fn run_playback<E: EncoderSink>(encoder: E, stop: &AtomicBool, poll: Duration) -> PlaybackReport {
    let mut guard = EncoderGuard(Some(encoder));

    let end = loop {
        let Some(encoder) = guard.0.as_mut() else {
            break PlaybackEnd::Stopped;
        };
        match encoder.try_exit() {
            Ok(Some(_)) => break PlaybackEnd::Finished,
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Failed to poll encoder: {}", e);
                break PlaybackEnd::WaitFailed(e);
            }
        }
        if stop.load(Ordering::SeqCst) {
            tracing::info!("Playback interrupted");
            break PlaybackEnd::Stopped;
        }
        thread::sleep(poll);
    };

    let encoder = match guard.0.take() {
        Some(encoder) => encoder.shutdown(),
        None => EncoderExit {
            code: None,
            success: false,
            killed: false,
        },
    };
    tracing::info!("Playback ended ({:?})", end);

    PlaybackReport { end, encoder }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct ScriptedEncoder {
        polls_until_exit: Option<usize>,
        exit_code: i32,
        shutdowns: Arc<AtomicUsize>,
    }

    impl EncoderSink for ScriptedEncoder {
        fn write_samples(&mut self, _bytes: &[u8]) -> Result<(), EncoderError> {
            Ok(())
        }

        fn try_exit(&mut self) -> Result<Option<EncoderExit>, EncoderError> {
            match self.polls_until_exit.as_mut() {
                Some(0) => Ok(Some(EncoderExit {
                    code: Some(self.exit_code),
                    success: self.exit_code == 0,
                    killed: false,
                })),
                Some(n) => {
                    *n -= 1;
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        fn shutdown(self) -> EncoderExit {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            EncoderExit {
                code: Some(self.exit_code),
                success: self.exit_code == 0,
                killed: false,
            }
        }
    }

    fn encoder(polls: Option<usize>, exit_code: i32) -> (ScriptedEncoder, Arc<AtomicUsize>) {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        (
            ScriptedEncoder {
                polls_until_exit: polls,
                exit_code,
                shutdowns: shutdowns.clone(),
            },
            shutdowns,
        )
    }

    #[test]
    fn test_natural_exit_is_reported() {
        let (enc, shutdowns) = encoder(Some(3), 0);
        let report = run_playback(enc, &AtomicBool::new(false), Duration::from_millis(1));
        assert!(matches!(report.end, PlaybackEnd::Finished));
        assert_eq!(report.exit_code(), exit_codes::CLEAN);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_encoder_is_runtime_error() {
        let (enc, _) = encoder(Some(0), 1);
        let report = run_playback(enc, &AtomicBool::new(false), Duration::from_millis(1));
        assert_eq!(report.exit_code(), exit_codes::RUNTIME);
    }

    #[test]
    fn test_stop_shuts_encoder_down() {
        let (enc, shutdowns) = encoder(None, 0);
        let report = run_playback(enc, &AtomicBool::new(true), Duration::from_millis(1));
        assert!(matches!(report.end, PlaybackEnd::Stopped));
        assert_eq!(report.exit_code(), exit_codes::CLEAN);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
