//! The streaming loop
//!
//! Pulls frames from a [`CaptureSource`], serializes them as s16le and writes
//! them to an [`EncoderSink`], one frame at a time and strictly in capture
//! order. The pipe write blocks when the encoder falls behind, which is the
//! only backpressure in the system.
//!
//! Both resources are held by a guard that releases them (capture first,
//! then the encoder) on every exit path, including unwinding.

use bytes::BytesMut;

use crate::audio::{CaptureSource, FrameRead};
use crate::encoder::{EncoderExit, EncoderSink};
use crate::error::{AudioError, EncoderError};
use crate::exit_codes;
use crate::pipeline::state::{InvalidTransition, Lifecycle, PipelineState};

/// Frames between progress log lines (10 s at 50 frames/s)
const PROGRESS_INTERVAL_FRAMES: u64 = 500;

/// Why the capture loop stopped
#[derive(Debug)]
pub enum SessionEnd {
    /// Interrupted through a stop handle
    Stopped,
    /// The capture source ran dry
    EndOfInput,
    /// The encoder stopped accepting input
    EncoderClosed(EncoderError),
    /// Fatal capture failure
    CaptureFailed(AudioError),
}

/// Counters for one session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_written: u64,
    /// Frames the capture side dropped while the loop was behind
    pub frames_skipped: u64,
    pub bytes_written: u64,
}

/// Outcome of a finished session
#[derive(Debug)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub stats: SessionStats,
    pub encoder: EncoderExit,
}

impl SessionReport {
    pub fn exit_code(&self) -> u8 {
        match &self.end {
            SessionEnd::Stopped | SessionEnd::EndOfInput => exit_codes::CLEAN,
            SessionEnd::EncoderClosed(_) if self.encoder.success => exit_codes::CLEAN,
            SessionEnd::EncoderClosed(_) | SessionEnd::CaptureFailed(_) => exit_codes::RUNTIME,
        }
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished,
}

/// Owns the capture source and encoder; releases whatever is left on drop
struct Resources<S: CaptureSource, E: EncoderSink> {
    source: Option<S>,
    encoder: Option<E>,
}

impl<S: CaptureSource, E: EncoderSink> Resources<S, E> {
    fn release(&mut self) -> Option<EncoderExit> {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.encoder.take().map(EncoderSink::shutdown)
    }
}

impl<S: CaptureSource, E: EncoderSink> Drop for Resources<S, E> {
    fn drop(&mut self) {
        if self.source.is_some() || self.encoder.is_some() {
            tracing::warn!("Releasing capture and encoder after abnormal exit");
            self.release();
        }
    }
}

/// One capture-to-encoder streaming session
pub struct StreamingSession<S: CaptureSource, E: EncoderSink> {
    resources: Resources<S, E>,
    lifecycle: Lifecycle,
    buf: BytesMut,
    stats: SessionStats,
    end: Option<SessionEnd>,
}

impl<S: CaptureSource, E: EncoderSink> StreamingSession<S, E> {
    /// Start a session whose registration already completed
    pub fn new(source: S, encoder: E) -> Self {
        let mut lifecycle = Lifecycle::new();
        // Both are valid from a fresh lifecycle
        let _ = lifecycle.advance(PipelineState::Registering);
        let _ = lifecycle.advance(PipelineState::Capturing);
        Self::assemble(
            lifecycle,
            Resources {
                source: Some(source),
                encoder: Some(encoder),
            },
        )
    }

    /// Start a session from an externally driven lifecycle, which must be in
    /// `Registering`. On error both resources are released.
    pub fn with_lifecycle(
        mut lifecycle: Lifecycle,
        source: S,
        encoder: E,
    ) -> Result<Self, InvalidTransition> {
        let mut resources = Resources {
            source: Some(source),
            encoder: Some(encoder),
        };
        if let Err(e) = lifecycle.advance(PipelineState::Capturing) {
            resources.release();
            return Err(e);
        }
        Ok(Self::assemble(lifecycle, resources))
    }

    fn assemble(lifecycle: Lifecycle, resources: Resources<S, E>) -> Self {
        let frame_bytes = resources
            .source
            .as_ref()
            .map(|s| s.format().frame_bytes())
            .unwrap_or_default();

        Self {
            resources,
            lifecycle,
            buf: BytesMut::with_capacity(frame_bytes),
            stats: SessionStats::default(),
            end: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Read one frame and forward it to the encoder
    pub fn step(&mut self) -> Step {
        if self.end.is_some() {
            return Step::Finished;
        }
        let (Some(source), Some(encoder)) =
            (self.resources.source.as_mut(), self.resources.encoder.as_mut())
        else {
            self.terminate(SessionEnd::Stopped);
            return Step::Finished;
        };

        match source.next_frame() {
            Ok(FrameRead::Frame(frame)) => {
                self.buf.clear();
                frame.write_le(&mut self.buf);
                match encoder.write_samples(&self.buf) {
                    Ok(()) => {
                        self.stats.frames_written += 1;
                        self.stats.bytes_written += self.buf.len() as u64;
                        if self.stats.frames_written % PROGRESS_INTERVAL_FRAMES == 0 {
                            tracing::debug!(
                                "Streamed {} frames ({:.1} KB), {} skipped",
                                self.stats.frames_written,
                                self.stats.bytes_written as f64 / 1024.0,
                                self.stats.frames_skipped
                            );
                        }
                        Step::Continue
                    }
                    Err(e) => {
                        tracing::warn!("Encoder input closed: {}", e);
                        self.terminate(SessionEnd::EncoderClosed(e));
                        Step::Finished
                    }
                }
            }
            Ok(FrameRead::Overflow { dropped }) => {
                self.stats.frames_skipped += dropped;
                tracing::debug!(
                    "Input overflowed, {} frame(s) dropped ({} so far)",
                    dropped,
                    self.stats.frames_skipped
                );
                Step::Continue
            }
            Ok(FrameRead::Stopped) => {
                tracing::info!("Capture stopped");
                self.terminate(SessionEnd::Stopped);
                Step::Finished
            }
            Ok(FrameRead::EndOfInput) => {
                tracing::info!("Capture reached end of input");
                self.terminate(SessionEnd::EndOfInput);
                Step::Finished
            }
            Err(e) => {
                tracing::error!("Stream read error: {}", e);
                self.terminate(SessionEnd::CaptureFailed(e));
                Step::Finished
            }
        }
    }

    fn terminate(&mut self, end: SessionEnd) {
        if self.end.is_none() {
            self.end = Some(end);
            if let Err(e) = self.lifecycle.advance(PipelineState::Terminating) {
                tracing::warn!("{}", e);
            }
        }
    }

    /// Loop until capture or encoder ends the session, then tear down
    pub fn run(mut self) -> SessionReport {
        tracing::info!("Streaming...");
        while self.step() == Step::Continue {}
        self.finish()
    }

    /// Release capture, then the encoder, and report
    pub fn finish(mut self) -> SessionReport {
        self.terminate(SessionEnd::Stopped);

        let encoder = self.resources.release().unwrap_or(EncoderExit {
            code: None,
            success: false,
            killed: false,
        });
        if let Err(e) = self.lifecycle.advance(PipelineState::Closed) {
            tracing::warn!("{}", e);
        }

        let end = self.end.take().unwrap_or(SessionEnd::Stopped);
        tracing::info!(
            "Session ended ({:?}): {} frames written, {} skipped, {:.1} KB",
            end,
            self.stats.frames_written,
            self.stats.frames_skipped,
            self.stats.bytes_written as f64 / 1024.0
        );

        SessionReport {
            end,
            stats: self.stats,
            encoder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFrame, CaptureFormat};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Read,
        Write(Vec<u8>),
        Close,
        Shutdown,
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    enum Script {
        Frame(Vec<i16>),
        Overflow(u64),
        Fail,
        Stop,
        Panic,
    }

    struct FakeSource {
        script: VecDeque<Script>,
        log: Log,
        sequence: u64,
    }

    impl FakeSource {
        fn new(script: Vec<Script>, log: Log) -> Self {
            Self {
                script: script.into(),
                log,
                sequence: 0,
            }
        }
    }

    impl CaptureSource for FakeSource {
        fn format(&self) -> CaptureFormat {
            CaptureFormat::for_rate(8000).unwrap()
        }

        fn next_frame(&mut self) -> Result<FrameRead, AudioError> {
            self.log.lock().push(Event::Read);
            match self.script.pop_front() {
                Some(Script::Frame(samples)) => {
                    self.sequence += 1;
                    Ok(FrameRead::Frame(AudioFrame::new(samples, self.sequence - 1)))
                }
                Some(Script::Overflow(dropped)) => Ok(FrameRead::Overflow { dropped }),
                Some(Script::Fail) => Err(AudioError::StreamError("device unplugged".into())),
                Some(Script::Stop) => Ok(FrameRead::Stopped),
                Some(Script::Panic) => panic!("capture callback panicked"),
                None => Ok(FrameRead::EndOfInput),
            }
        }

        fn close(&mut self) {
            self.log.lock().push(Event::Close);
        }
    }

    struct FakeEncoder {
        log: Log,
        accept_writes: usize,
        exit_code: i32,
    }

    impl FakeEncoder {
        fn new(log: Log) -> Self {
            Self {
                log,
                accept_writes: usize::MAX,
                exit_code: 0,
            }
        }

        fn closing_after(log: Log, writes: usize, exit_code: i32) -> Self {
            Self {
                log,
                accept_writes: writes,
                exit_code,
            }
        }
    }

    impl EncoderSink for FakeEncoder {
        fn write_samples(&mut self, bytes: &[u8]) -> Result<(), EncoderError> {
            if self.accept_writes == 0 {
                return Err(EncoderError::WriteFailed(std::io::ErrorKind::BrokenPipe.into()));
            }
            self.accept_writes -= 1;
            self.log.lock().push(Event::Write(bytes.to_vec()));
            Ok(())
        }

        fn try_exit(&mut self) -> Result<Option<EncoderExit>, EncoderError> {
            Ok(None)
        }

        fn shutdown(self) -> EncoderExit {
            self.log.lock().push(Event::Shutdown);
            EncoderExit {
                code: Some(self.exit_code),
                success: self.exit_code == 0,
                killed: false,
            }
        }
    }

    fn le(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn writes(log: &Log) -> Vec<Vec<u8>> {
        log.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Write(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    fn teardown(log: &Log) -> Vec<Event> {
        log.lock()
            .iter()
            .filter(|e| matches!(e, Event::Close | Event::Shutdown))
            .cloned()
            .collect()
    }

    #[test]
    fn test_frames_written_in_order_as_le() {
        let log = Log::default();
        let source = FakeSource::new(
            vec![Script::Frame(vec![1, -1]), Script::Frame(vec![256, 32767])],
            log.clone(),
        );
        let report = StreamingSession::new(source, FakeEncoder::new(log.clone())).run();

        assert!(matches!(report.end, SessionEnd::EndOfInput));
        assert_eq!(report.exit_code(), exit_codes::CLEAN);
        assert_eq!(writes(&log), vec![le(&[1, -1]), le(&[256, 32767])]);
        assert_eq!(report.stats.frames_written, 2);
        assert_eq!(report.stats.bytes_written, 8);
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }

    #[test]
    fn test_ten_overflows_keep_capturing() {
        let log = Log::default();
        let mut script: Vec<Script> = (0..10).map(|_| Script::Overflow(1)).collect();
        script.push(Script::Frame(vec![42; 4]));
        let mut session =
            StreamingSession::new(FakeSource::new(script, log.clone()), FakeEncoder::new(log.clone()));

        for _ in 0..10 {
            assert_eq!(session.step(), Step::Continue);
            assert_eq!(session.state(), PipelineState::Capturing);
        }
        assert_eq!(session.stats().frames_skipped, 10);
        assert!(writes(&log).is_empty());

        assert_eq!(session.step(), Step::Continue);
        assert_eq!(writes(&log), vec![le(&[42; 4])]);

        let report = session.run();
        assert_eq!(report.stats.frames_skipped, 10);
        assert_eq!(report.stats.frames_written, 1);
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }

    #[test]
    fn test_overflow_does_not_alter_next_frame() {
        let log = Log::default();
        let script = vec![
            Script::Frame(vec![10, 20, 30]),
            Script::Overflow(1),
            Script::Frame(vec![-7, 8, -9]),
        ];
        StreamingSession::new(FakeSource::new(script, log.clone()), FakeEncoder::new(log.clone())).run();
        assert_eq!(writes(&log), vec![le(&[10, 20, 30]), le(&[-7, 8, -9])]);
    }

    #[test]
    fn test_skipped_count_includes_every_dropped_frame() {
        let log = Log::default();
        let script = vec![
            Script::Overflow(7),
            Script::Frame(vec![1]),
            Script::Overflow(2),
            Script::Frame(vec![2]),
        ];
        let report =
            StreamingSession::new(FakeSource::new(script, log.clone()), FakeEncoder::new(log.clone())).run();

        assert_eq!(report.stats.frames_skipped, 9);
        assert_eq!(report.stats.frames_written, 2);
        assert_eq!(report.exit_code(), exit_codes::CLEAN);
    }

    #[test]
    fn test_capture_failure_tears_down_everything() {
        let log = Log::default();
        let script = vec![Script::Frame(vec![1]), Script::Fail, Script::Frame(vec![2])];
        let report =
            StreamingSession::new(FakeSource::new(script, log.clone()), FakeEncoder::new(log.clone())).run();

        assert!(matches!(report.end, SessionEnd::CaptureFailed(_)));
        assert_eq!(report.exit_code(), exit_codes::RUNTIME);
        assert_eq!(writes(&log), vec![le(&[1])]);
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }

    #[test]
    fn test_write_failure_ends_session() {
        let log = Log::default();
        let script = vec![Script::Frame(vec![1]), Script::Frame(vec![2]), Script::Frame(vec![3])];
        let encoder = FakeEncoder::closing_after(log.clone(), 1, 1);
        let report = StreamingSession::new(FakeSource::new(script, log.clone()), encoder).run();

        assert!(matches!(report.end, SessionEnd::EncoderClosed(_)));
        assert_eq!(report.exit_code(), exit_codes::RUNTIME);
        assert_eq!(report.encoder.code, Some(1));
        // No read after the failed write
        let reads = log.lock().iter().filter(|e| **e == Event::Read).count();
        assert_eq!(reads, 2);
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }

    #[test]
    fn test_encoder_closing_cleanly_is_not_a_failure() {
        let log = Log::default();
        let script = vec![Script::Frame(vec![1]), Script::Frame(vec![2])];
        let encoder = FakeEncoder::closing_after(log.clone(), 1, 0);
        let report = StreamingSession::new(FakeSource::new(script, log.clone()), encoder).run();
        assert_eq!(report.exit_code(), exit_codes::CLEAN);
    }

    #[test]
    fn test_stop_is_clean() {
        let log = Log::default();
        let script = vec![Script::Frame(vec![5]), Script::Stop, Script::Frame(vec![6])];
        let report =
            StreamingSession::new(FakeSource::new(script, log.clone()), FakeEncoder::new(log.clone())).run();

        assert!(matches!(report.end, SessionEnd::Stopped));
        assert_eq!(report.exit_code(), exit_codes::CLEAN);
        assert_eq!(writes(&log).len(), 1);
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }

    #[test]
    fn test_panic_still_releases_both_once() {
        let log = Log::default();
        let script = vec![Script::Frame(vec![1]), Script::Panic];
        let source = FakeSource::new(script, log.clone());
        let encoder = FakeEncoder::new(log.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            StreamingSession::new(source, encoder).run()
        }));

        assert!(result.is_err());
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }

    #[test]
    fn test_finish_early_releases_and_closes() {
        let log = Log::default();
        let script = vec![Script::Frame(vec![1]), Script::Frame(vec![2])];
        let mut session =
            StreamingSession::new(FakeSource::new(script, log.clone()), FakeEncoder::new(log.clone()));
        session.step();
        let report = session.finish();

        assert!(matches!(report.end, SessionEnd::Stopped));
        assert_eq!(report.stats.frames_written, 1);
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }

    #[test]
    fn test_invalid_lifecycle_releases_resources() {
        let log = Log::default();
        let result = StreamingSession::with_lifecycle(
            Lifecycle::new(),
            FakeSource::new(vec![], log.clone()),
            FakeEncoder::new(log.clone()),
        );

        assert!(result.is_err());
        assert_eq!(teardown(&log), vec![Event::Close, Event::Shutdown]);
    }
}
