//! Fixed-size mono PCM frames and their wire layout
//!
//! The encoder reads raw `s16le` mono PCM from its stdin, so every frame is
//! written as two bytes per sample, least-significant byte first, in capture
//! order. [`AudioFrame::write_le`] is the only place that layout is produced.

use bytes::{BufMut, BytesMut};

use crate::constants::{BYTES_PER_SAMPLE, FRAMES_PER_SECOND, MIN_SAMPLE_RATE};
use crate::error::AudioError;

/// Samples per frame for a native sample rate: `round(rate / 50)`
pub fn frame_size_for_rate(sample_rate: f64) -> usize {
    (sample_rate / FRAMES_PER_SECOND as f64).round() as usize
}

/// Negotiated capture parameters, constant for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub frame_size: usize,
}

impl CaptureFormat {
    /// Format for a native rate; fails when a frame would hold no samples
    pub fn for_rate(sample_rate: u32) -> Result<Self, AudioError> {
        let frame_size = frame_size_for_rate(sample_rate as f64);
        if frame_size == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "sample rate {sample_rate} Hz is below the {MIN_SAMPLE_RATE} Hz minimum"
            )));
        }
        Ok(Self {
            sample_rate,
            frame_size,
        })
    }

    /// Serialized length of one frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_size * BYTES_PER_SAMPLE
    }
}

/// One frame of mono 16-bit samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    /// Capture order, starting at 0
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sequence: u64) -> Self {
        Self { samples, sequence }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Append the frame to `buf` as s16le
    pub fn write_le(&self, buf: &mut BytesMut) {
        buf.reserve(self.samples.len() * BYTES_PER_SAMPLE);
        for &sample in &self.samples {
            buf.put_i16_le(sample);
        }
    }
}

/// Decode an s16le byte stream; a trailing odd byte is ignored
pub fn decode_le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_size_is_twenty_ms() {
        assert_eq!(frame_size_for_rate(48000.0), 960);
        assert_eq!(frame_size_for_rate(44100.0), 882);
        assert_eq!(frame_size_for_rate(16000.0), 320);
        assert_eq!(frame_size_for_rate(22050.0), 441);
        // 11025 / 50 = 220.5 rounds away from zero
        assert_eq!(frame_size_for_rate(11025.0), 221);

        let format = CaptureFormat::for_rate(48000).unwrap();
        assert_eq!(format.frame_bytes(), 1920);
    }

    #[test]
    fn test_rates_without_a_whole_sample_are_rejected() {
        assert_eq!(CaptureFormat::for_rate(MIN_SAMPLE_RATE).unwrap().frame_size, 1);
        for rate in [0, 1, 20, MIN_SAMPLE_RATE - 1] {
            assert!(
                matches!(CaptureFormat::for_rate(rate), Err(AudioError::UnsupportedFormat(_))),
                "{rate} Hz accepted"
            );
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let frame = AudioFrame::new(vec![0x0102, -2, i16::MIN, i16::MAX], 0);
        let mut buf = BytesMut::new();
        frame.write_le(&mut buf);
        assert_eq!(
            &buf[..],
            &[0x02, 0x01, 0xFE, 0xFF, 0x00, 0x80, 0xFF, 0x7F]
        );
    }

    #[test]
    fn test_decode_ignores_trailing_byte() {
        assert_eq!(decode_le(&[0x01, 0x00, 0xFF]), vec![1]);
    }

    proptest! {
        #[test]
        fn prop_serialized_frame_decodes_to_same_samples(rate in 8000u32..=192_000) {
            let format = CaptureFormat::for_rate(rate).unwrap();
            let samples: Vec<i16> = (0..format.frame_size)
                .map(|i| (i as i32 * 7919 - 16384) as i16)
                .collect();
            let frame = AudioFrame::new(samples.clone(), 0);

            let mut buf = BytesMut::new();
            frame.write_le(&mut buf);

            prop_assert_eq!(buf.len(), 2 * format.frame_size);
            prop_assert_eq!(decode_le(&buf), samples);
        }

        #[test]
        fn prop_arbitrary_samples_survive_serialization(samples in prop::collection::vec(any::<i16>(), 0..2048)) {
            let mut buf = BytesMut::new();
            AudioFrame::new(samples.clone(), 0).write_le(&mut buf);
            prop_assert_eq!(decode_le(&buf), samples);
        }
    }
}
