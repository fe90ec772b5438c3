//! Audio capture from an input device
//!
//! The cpal stream lives on a dedicated thread. Its callback downmixes to
//! mono, converts to `i16`, slices the input into fixed-size frames and hands
//! them to the streaming loop over a bounded queue. When that queue is full
//! the frame is dropped, and the next read reports how many were lost.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{select_input_device, InputDevice};
use crate::audio::frame::{AudioFrame, CaptureFormat};
use crate::constants::CAPTURE_QUEUE_FRAMES;
use crate::error::AudioError;

/// Result of one blocking read from a capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete frame, in capture order
    Frame(AudioFrame),
    /// Frames were lost since the previous read; nothing to write this turn
    Overflow { dropped: u64 },
    /// The source was asked to stop
    Stopped,
    /// The source has no more data
    EndOfInput,
}

/// Where raw samples come from
pub trait CaptureSource {
    /// Sample rate and frame size, fixed once the source is open
    fn format(&self) -> CaptureFormat;

    /// Block until a full frame, an overflow, or a stop is available.
    ///
    /// Errors are fatal for the session.
    fn next_frame(&mut self) -> Result<FrameRead, AudioError>;

    /// Release the underlying resource. Safe to call more than once.
    fn close(&mut self);
}

/// Messages from the capture thread and stop handles
enum CaptureEvent {
    Stop,
    Error(String),
}

/// Cancels a blocked read from another thread or a signal handler
#[derive(Clone)]
pub struct CaptureStopper {
    stopped: Arc<AtomicBool>,
    wake: Option<Sender<CaptureEvent>>,
}

impl CaptureStopper {
    pub(crate) fn flag_only(stopped: Arc<AtomicBool>) -> Self {
        Self { stopped, wake: None }
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            if let Some(wake) = &self.wake {
                let _ = wake.send(CaptureEvent::Stop);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Producer half of the capture queue, owned by the device callback
struct FrameSender {
    frames: Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Queue a frame, or drop and count it when the reader is behind
    fn offer(&self, frame: AudioFrame) {
        match self.frames.try_send(frame) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

/// Consumer half of the capture queue, plus stop requests and stream errors
struct FrameReceiver {
    frames: Receiver<AudioFrame>,
    events: Receiver<CaptureEvent>,
    events_tx: Sender<CaptureEvent>,
    dropped: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
}

fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (frames_tx, frames) = bounded(capacity);
    let (events_tx, events) = unbounded();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        FrameSender {
            frames: frames_tx,
            dropped: dropped.clone(),
        },
        FrameReceiver {
            frames,
            events,
            events_tx,
            dropped,
            stopped: Arc::new(AtomicBool::new(false)),
        },
    )
}

impl FrameReceiver {
    fn stopper(&self) -> CaptureStopper {
        CaptureStopper {
            stopped: self.stopped.clone(),
            wake: Some(self.events_tx.clone()),
        }
    }

    /// Sender for errors reported by the device
    fn error_sender(&self) -> Sender<CaptureEvent> {
        self.events_tx.clone()
    }

    fn recv(&self) -> Result<FrameRead, AudioError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(FrameRead::Stopped);
        }
        let dropped = self.dropped.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            return Ok(FrameRead::Overflow { dropped });
        }

        select! {
            recv(self.frames) -> msg => match msg {
                Ok(frame) => Ok(FrameRead::Frame(frame)),
                Err(_) => Err(AudioError::Disconnected),
            },
            recv(self.events) -> msg => match msg {
                Ok(CaptureEvent::Stop) => Ok(FrameRead::Stopped),
                Ok(CaptureEvent::Error(e)) => Err(AudioError::StreamError(e)),
                Err(_) => Err(AudioError::Disconnected),
            },
        }
    }
}

/// Live capture from a cpal input device
pub struct DeviceCapture {
    device_name: String,
    format: CaptureFormat,
    /// Keeps the capture thread's stream alive
    running: Arc<AtomicBool>,
    queue: FrameReceiver,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceCapture {
    /// Open the preferred input device (or the system default) at its
    /// native sample rate and start capturing.
    pub fn open(preferred: Option<&str>) -> Result<Self, AudioError> {
        let device = select_input_device(preferred)?;
        Self::open_device(device)
    }

    pub fn open_device(device: InputDevice) -> Result<Self, AudioError> {
        let supported = device.default_input_config()?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let format = CaptureFormat::for_rate(config.sample_rate.0)?;
        let device_name = device.name.clone();

        tracing::info!(
            "Using input device {:?}, sample rate: {} Hz, {} channel(s), {:?}, {} samples/frame",
            device_name,
            format.sample_rate,
            config.channels,
            sample_format,
            format.frame_size
        );

        let running = Arc::new(AtomicBool::new(true));
        let (frames, queue) = frame_queue(CAPTURE_QUEUE_FRAMES);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let shared = CallbackShared {
            frames,
            errors: queue.error_sender(),
            frame_size: format.frame_size,
            channels: config.channels as usize,
        };
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = match build_stream(&cpal_device, &config, sample_format, shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(AudioError::Io)?;

        let opened = ready_rx.recv().unwrap_or(Err(AudioError::Disconnected));
        if let Err(e) = opened {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        Ok(Self {
            device_name,
            format,
            running,
            queue,
            thread_handle: Some(handle),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Handle that makes a blocked [`CaptureSource::next_frame`] return
    /// [`FrameRead::Stopped`]
    pub fn stopper(&self) -> CaptureStopper {
        self.queue.stopper()
    }
}

impl CaptureSource for DeviceCapture {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<FrameRead, AudioError> {
        self.queue.recv()
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Capture from {:?} closed", self.device_name);
        }
    }
}

impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// State moved into the cpal callbacks
struct CallbackShared {
    frames: FrameSender,
    errors: Sender<CaptureEvent>,
    frame_size: usize,
    channels: usize,
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    shared: CallbackShared,
) -> Result<cpal::Stream, AudioError> {
    match sample_format {
        SampleFormat::I16 => build_typed_stream::<i16>(device, config, shared),
        SampleFormat::U16 => build_typed_stream::<u16>(device, config, shared),
        SampleFormat::F32 => build_typed_stream::<f32>(device, config, shared),
        SampleFormat::I32 => build_typed_stream::<i32>(device, config, shared),
        other => Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: CallbackShared,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let CallbackShared {
        frames,
        errors,
        frame_size,
        channels,
    } = shared;

    let mut framer = Framer::new(frame_size, channels);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            framer.push(data, |frame| frames.offer(frame));
        },
        move |err| {
            let _ = errors.send(CaptureEvent::Error(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

/// Slices interleaved device buffers of any size into mono frames
struct Framer {
    frame_size: usize,
    channels: usize,
    pending: Vec<i16>,
    sequence: u64,
}

impl Framer {
    fn new(frame_size: usize, channels: usize) -> Self {
        Self {
            frame_size,
            channels: channels.max(1),
            pending: Vec::with_capacity(frame_size),
            sequence: 0,
        }
    }

    fn push<T>(&mut self, data: &[T], mut emit: impl FnMut(AudioFrame))
    where
        T: Sample,
        i16: FromSample<T>,
    {
        for group in data.chunks_exact(self.channels) {
            self.pending.push(downmix(group));
            if self.pending.len() == self.frame_size {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(AudioFrame::new(samples, self.sequence));
                self.sequence += 1;
            }
        }
    }
}

/// Average one interleaved sample group into a single mono sample
fn downmix<T>(group: &[T]) -> i16
where
    T: Sample,
    i16: FromSample<T>,
{
    if let [only] = group {
        return i16::from_sample(*only);
    }
    let sum: i32 = group.iter().map(|&s| i16::from_sample(s) as i32).sum();
    (sum / group.len() as i32) as i16
}

/// Stop handle for sources that poll a flag between frames
pub(crate) fn flag_stopper() -> (Arc<AtomicBool>, CaptureStopper) {
    let flag = Arc::new(AtomicBool::new(false));
    (flag.clone(), CaptureStopper::flag_only(flag))
}
