//! # Media Source Abstraction
//!
//! The pipeline never touches container or codec internals. A backend opens
//! a path into an [`OpenedMedia`]: a packet source plus one decoder per
//! selected stream. Timestamps stay in stream ticks until a worker rescales
//! them to microseconds with the stream's time base.

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::scale::PixelFormat;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Failed to open {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Unrecognized container: {0}")]
    Probe(String),
    #[error("No playable video or audio stream")]
    NoStreams,
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("Audio conversion setup failed: {0}")]
    Resampler(String),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("End of stream")]
    EndOfStream,
    #[error("Read failed: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum SeekError {
    #[error("Source is not seekable")]
    Unsupported,
    #[error("Seek to {target_us}us failed: {reason}")]
    Failed { target_us: i64, reason: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Corrupt packet: {0}")]
    Corrupt(String),
    #[error("Decoder needs a keyframe")]
    NeedKeyframe,
    #[error("Decode failed: {0}")]
    Backend(String),
}

// ============================================================================
// Time Base
// ============================================================================

/// A rational number, used for stream time bases and frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const MICROS: Rational = Rational::new(1, 1_000_000);

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn is_zero(self) -> bool {
        self.num == 0 || self.den == 0
    }

    /// Stream ticks in this time base to microseconds
    pub fn ticks_to_us(self, ticks: i64) -> i64 {
        rescale(ticks, self, Self::MICROS)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Convert `value` from time base `from` to time base `to`, rounding to
/// nearest (ties away from zero). Returns 0 for degenerate time bases.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    let q = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

// ============================================================================
// Streams / Packets / Frames
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub time_base: Rational,
    pub width: u32,
    pub height: u32,
    pub avg_frame_rate: Rational,
    /// Declared frame count (0 when unknown)
    pub frame_count: u64,
    /// Free-form metadata comment
    pub comment: Option<String>,
}

impl VideoStreamInfo {
    pub fn fps(&self) -> f64 {
        self.avg_frame_rate.to_f64()
    }

    /// Best-effort guess at an embedded cover image rather than real video:
    /// a "cover" comment, or a stream that declares a single frame / no rate.
    pub fn is_cover(&self) -> bool {
        let commented = self
            .comment
            .as_deref()
            .map(|c| c.starts_with("cover") || c.starts_with("Cover"))
            .unwrap_or(false);
        commented || self.frame_count == 1 || self.avg_frame_rate.is_zero()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub time_base: Rational,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A compressed packet as read from the container
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in stream ticks
    pub pts: Option<i64>,
    /// Duration in stream ticks (0 when unknown)
    pub duration: i64,
    pub keyframe: bool,
    pub data: Bytes,
}

/// A decoded picture, before color conversion
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    pub data: Vec<u8>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in stream ticks
    pub pts: Option<i64>,
}

/// Decoded audio, interleaved f32
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Presentation timestamp in stream ticks
    pub pts: Option<i64>,
}

impl AudioFrame {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// An opened container
pub trait MediaSource: Send {
    fn video_stream(&self) -> Option<&VideoStreamInfo>;

    fn audio_stream(&self) -> Option<&AudioStreamInfo>;

    /// Container duration in microseconds (0 when unknown)
    fn duration_us(&self) -> i64;

    /// Next packet from any stream
    fn read_packet(&mut self) -> Result<Packet, ReadError>;

    /// Reposition to the nearest keyframe at or before `target_us`
    fn seek(&mut self, target_us: i64) -> Result<(), SeekError>;
}

pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawVideoFrame>, DecodeError>;

    /// Pull frames the codec is still holding without new input
    fn drain(&mut self) -> Result<Vec<RawVideoFrame>, DecodeError>;

    /// Discard internal state; the next packet must be a keyframe
    fn flush(&mut self);

    fn name(&self) -> &str;
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>, DecodeError>;

    fn flush(&mut self);

    fn name(&self) -> &str;
}

/// Everything a backend hands over for one file
pub struct OpenedMedia {
    pub source: Box<dyn MediaSource>,
    pub video_decoder: Option<Box<dyn VideoDecoder>>,
    pub audio_decoder: Option<Box<dyn AudioDecoder>>,
}

impl OpenedMedia {
    /// Describe the playable streams (a stream without a decoder does not
    /// count) and fail if there are none.
    pub fn info(&self) -> Result<MediaInfo, OpenError> {
        let info = MediaInfo {
            video: self
                .video_decoder
                .as_ref()
                .and(self.source.video_stream().cloned()),
            audio: self
                .audio_decoder
                .as_ref()
                .and(self.source.audio_stream().cloned()),
            duration_us: self.source.duration_us().max(0),
        };
        if info.video.is_none() && info.audio.is_none() {
            return Err(OpenError::NoStreams);
        }
        Ok(info)
    }
}

pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, path: &Path) -> Result<OpenedMedia, OpenError>;
}

// ============================================================================
// Media Info
// ============================================================================

/// What `open` found, as seen by the shell
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub video: Option<VideoStreamInfo>,
    pub audio: Option<AudioStreamInfo>,
    pub duration_us: i64,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Video stream present and it is a static cover image
    pub fn is_cover(&self) -> bool {
        self.video.as_ref().map(|v| v.is_cover()).unwrap_or(false)
    }

    /// Video that actually moves
    pub fn has_motion_video(&self) -> bool {
        self.has_video() && !self.is_cover()
    }

    /// Frame rate used for pacing and packet caps
    pub fn fps(&self, fallback: u32) -> f64 {
        match &self.video {
            Some(v) if v.fps() > 0.0 => v.fps(),
            _ => fallback as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale() {
        let tb = Rational::new(1, 90_000);
        assert_eq!(tb.ticks_to_us(90_000), 1_000_000);
        assert_eq!(tb.ticks_to_us(3_000), 33_333);
        assert_eq!(rescale(1_000_000, Rational::MICROS, tb), 90_000);

        let audio = Rational::new(1, 44_100);
        assert_eq!(audio.ticks_to_us(44_100 * 3), 3_000_000);
        assert_eq!(audio.ticks_to_us(1), 23);
        assert_eq!(audio.ticks_to_us(-1), -23);

        assert_eq!(rescale(5, Rational::new(1, 0), Rational::MICROS), 0);
    }

    #[test]
    fn test_cover_heuristic() {
        let mut info = VideoStreamInfo {
            index: 0,
            time_base: Rational::new(1, 90_000),
            width: 320,
            height: 240,
            avg_frame_rate: Rational::new(30, 1),
            frame_count: 300,
            comment: None,
        };
        assert!(!info.is_cover());

        info.comment = Some("Cover (front)".into());
        assert!(info.is_cover());

        info.comment = Some("a cover".into());
        assert!(!info.is_cover());

        info.avg_frame_rate = Rational::new(0, 1);
        assert!(info.is_cover());

        info.avg_frame_rate = Rational::new(25, 1);
        info.frame_count = 1;
        assert!(info.is_cover());
    }
}
