//! Decoded audio to device PCM
//!
//! The output side always runs 16-bit little-endian interleaved stereo at
//! the stream's own sample rate. Mono is duplicated, anything wider than
//! stereo is folded down onto left/right.

use crate::source::{AudioFrame, OpenError};

/// Bytes per output frame (2 channels * 2 bytes)
pub const BYTES_PER_FRAME: usize = 4;

#[derive(Debug, Clone)]
pub struct PcmConverter {
    sample_rate: u32,
    channels: u16,
}

impl PcmConverter {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, OpenError> {
        if sample_rate == 0 {
            return Err(OpenError::Resampler("sample rate is zero".into()));
        }
        if channels == 0 {
            return Err(OpenError::Resampler("stream has no channels".into()));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Microseconds of audio in `bytes` of converted output
    pub fn duration_us(&self, bytes: usize) -> i64 {
        let frames = (bytes / BYTES_PER_FRAME) as i64;
        frames * 1_000_000 / self.sample_rate as i64
    }

    pub fn convert(&self, frame: &AudioFrame) -> Vec<u8> {
        let channels = if frame.channels == 0 {
            self.channels as usize
        } else {
            frame.channels as usize
        };
        let mut out = Vec::with_capacity(frame.samples.len() / channels * BYTES_PER_FRAME);

        for chunk in frame.samples.chunks_exact(channels) {
            let (l, r) = match channels {
                1 => (chunk[0], chunk[0]),
                2 => (chunk[0], chunk[1]),
                n => {
                    // Even channels lean left, odd ones right
                    let (mut l, mut r, mut nl, mut nr) = (0.0f32, 0.0f32, 0u32, 0u32);
                    for (i, s) in chunk.iter().enumerate().take(n) {
                        if i % 2 == 0 {
                            l += s;
                            nl += 1;
                        } else {
                            r += s;
                            nr += 1;
                        }
                    }
                    (l / nl.max(1) as f32, r / nr.max(1) as f32)
                }
            };
            out.extend_from_slice(&to_i16(l).to_le_bytes());
            out.extend_from_slice(&to_i16(r).to_le_bytes());
        }

        out
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<f32>, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            channels,
            sample_rate: 8_000,
            pts: Some(0),
        }
    }

    fn decode(pcm: &[u8]) -> Vec<i16> {
        pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
    }

    #[test]
    fn test_mono_is_duplicated() {
        let conv = PcmConverter::new(8_000, 1).unwrap();
        let pcm = conv.convert(&frame(vec![0.5, -1.0], 1));
        assert_eq!(decode(&pcm), vec![16_384, 16_384, -32_767, -32_767]);
    }

    #[test]
    fn test_stereo_clips() {
        let conv = PcmConverter::new(8_000, 2).unwrap();
        let pcm = conv.convert(&frame(vec![2.0, -3.0, 0.0, 0.0], 2));
        assert_eq!(decode(&pcm), vec![32_767, -32_767, 0, 0]);
        assert_eq!(conv.duration_us(pcm.len()), 250);
    }

    #[test]
    fn test_surround_folds_down() {
        let conv = PcmConverter::new(48_000, 4).unwrap();
        let pcm = conv.convert(&frame(vec![1.0, 0.0, 0.0, 0.0], 4));
        assert_eq!(decode(&pcm), vec![16_384, 0]);
    }

    #[test]
    fn test_rejects_bad_format() {
        assert!(PcmConverter::new(0, 2).is_err());
        assert!(PcmConverter::new(44_100, 0).is_err());
    }
}
