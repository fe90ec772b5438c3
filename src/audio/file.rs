//! Raw PCM file capture source
//!
//! Reads s16le mono PCM in the same frame size a live device would produce.
//! Reading is not paced; the encoder is told to consume its input in real
//! time instead.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::capture::{flag_stopper, CaptureSource, CaptureStopper, FrameRead};
use crate::audio::frame::{decode_le, AudioFrame, CaptureFormat};
use crate::error::AudioError;

/// Capture source backed by any byte reader of s16le samples
pub struct RawPcmSource<R> {
    reader: Option<R>,
    format: CaptureFormat,
    buf: Vec<u8>,
    sequence: u64,
    stopped: Arc<AtomicBool>,
    stopper: CaptureStopper,
}

/// Raw PCM read from a file on disk
pub type RawPcmFileSource = RawPcmSource<BufReader<File>>;

impl RawPcmFileSource {
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self, AudioError> {
        let format = CaptureFormat::for_rate(sample_rate)?;
        let file = File::open(path)?;
        tracing::info!(
            "Reading raw s16le PCM from {} at {} Hz",
            path.display(),
            sample_rate
        );
        Ok(Self::with_format(BufReader::new(file), format))
    }
}

impl<R: Read> RawPcmSource<R> {
    pub fn from_reader(reader: R, sample_rate: u32) -> Result<Self, AudioError> {
        Ok(Self::with_format(reader, CaptureFormat::for_rate(sample_rate)?))
    }

    fn with_format(reader: R, format: CaptureFormat) -> Self {
        let (stopped, stopper) = flag_stopper();
        Self {
            reader: Some(reader),
            buf: vec![0u8; format.frame_bytes()],
            format,
            sequence: 0,
            stopped,
            stopper,
        }
    }

    pub fn stopper(&self) -> CaptureStopper {
        self.stopper.clone()
    }

    /// Fill `buf` completely; `Ok(false)` on a clean or partial end of file
    fn fill(reader: &mut R, buf: &mut [u8]) -> Result<bool, AudioError> {
        match reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(AudioError::Io(e)),
        }
    }
}

impl<R: Read> CaptureSource for RawPcmSource<R> {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<FrameRead, AudioError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(FrameRead::Stopped);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(FrameRead::EndOfInput);
        };

        if !Self::fill(reader, &mut self.buf)? {
            return Ok(FrameRead::EndOfInput);
        }

        let frame = AudioFrame::new(decode_le(&self.buf), self.sequence);
        self.sequence += 1;
        Ok(FrameRead::Frame(frame))
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!("Raw PCM source closed after {} frames", self.sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_reads_whole_frames_then_end() {
        // 8000 Hz -> 160 samples per frame; 2.5 frames of data
        let samples: Vec<i16> = (0..400).map(|i| i as i16 - 200).collect();
        let mut source = RawPcmSource::from_reader(Cursor::new(pcm(&samples)), 8000).unwrap();
        assert_eq!(source.format().frame_size, 160);

        let FrameRead::Frame(first) = source.next_frame().unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(first.samples(), &samples[..160]);
        assert_eq!(first.sequence, 0);

        let FrameRead::Frame(second) = source.next_frame().unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(second.samples(), &samples[160..320]);
        assert_eq!(second.sequence, 1);

        // Trailing partial frame is dropped
        assert_eq!(source.next_frame().unwrap(), FrameRead::EndOfInput);
    }

    #[test]
    fn test_stop_and_close() {
        let mut source = RawPcmSource::from_reader(Cursor::new(vec![0u8; 10_000]), 8000).unwrap();
        let stopper = source.stopper();
        stopper.stop();
        assert_eq!(source.next_frame().unwrap(), FrameRead::Stopped);

        let mut source = RawPcmSource::from_reader(Cursor::new(vec![0u8; 10_000]), 8000).unwrap();
        source.close();
        source.close();
        assert_eq!(source.next_frame().unwrap(), FrameRead::EndOfInput);
    }

    #[test]
    fn test_rate_too_low_for_a_frame_is_rejected() {
        // 20 Hz would mean zero-sample frames that never reach end of input
        let err = RawPcmSource::from_reader(Cursor::new(pcm(&[1, 2])), 20).err().unwrap();
        assert!(matches!(err, AudioError::UnsupportedFormat(_)));

        let mut source = RawPcmSource::from_reader(Cursor::new(pcm(&[1, 2])), 25).unwrap();
        assert_eq!(source.format().frame_size, 1);
        assert!(matches!(source.next_frame().unwrap(), FrameRead::Frame(_)));
        assert!(matches!(source.next_frame().unwrap(), FrameRead::Frame(_)));
        assert_eq!(source.next_frame().unwrap(), FrameRead::EndOfInput);
    }

    #[test]
    fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&pcm(&[7; 320])).unwrap();

        let mut source = RawPcmFileSource::open(file.path(), 16000).unwrap();
        assert!(matches!(source.next_frame().unwrap(), FrameRead::Frame(_)));
        assert_eq!(source.next_frame().unwrap(), FrameRead::EndOfInput);

        assert!(matches!(
            RawPcmFileSource::open(file.path(), 0),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }
}
