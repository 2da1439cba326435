//! Generated test media
//!
//! Color-bar video and a sine tone, produced on demand from a
//! [`PatternSpec`]. Packets carry just enough to regenerate the content, so
//! a ten minute "file" costs nothing. The video decoder behaves like a real
//! GOP-based codec: after a flush it refuses everything until a keyframe.

use std::f32::consts::TAU;
use std::path::Path;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::scale::PixelFormat;
use crate::source::{
    AudioDecoder, AudioFrame, AudioStreamInfo, DecodeError, MediaBackend, MediaSource, OpenError,
    OpenedMedia, Packet, RawVideoFrame, Rational, ReadError, SeekError, VideoDecoder,
    VideoStreamInfo,
};

const VIDEO_TIME_BASE: Rational = Rational::new(1, 90_000);
const VIDEO_STREAM: usize = 0;
const AUDIO_STREAM: usize = 1;
const TONE_HZ: f32 = 440.0;

const FLAG_KEYFRAME: u8 = 1;
const FLAG_CORRUPT: u8 = 2;

#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub duration: Duration,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Keyframe interval in frames
    pub gop: u32,
    pub video: bool,
    /// Single still frame tagged as cover art instead of moving video
    pub cover: bool,
    pub audio: bool,
    pub sample_rate: u32,
    pub channels: u16,
    /// Audio frames per packet
    pub chunk_frames: u32,
    /// Every n-th non-key video packet fails to decode
    pub corrupt_every: Option<u32>,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            fps: 30,
            width: 64,
            height: 36,
            gop: 30,
            video: true,
            cover: false,
            audio: true,
            sample_rate: 8_000,
            channels: 2,
            chunk_frames: 400,
            corrupt_every: None,
        }
    }
}

impl PatternSpec {
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn video_only(mut self) -> Self {
        self.audio = false;
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.video = false;
        self
    }

    pub fn with_cover(mut self) -> Self {
        self.video = true;
        self.cover = true;
        self
    }

    fn duration_us(&self) -> i64 {
        self.duration.as_micros() as i64
    }

    fn total_frames(&self) -> u64 {
        if !self.video {
            0
        } else if self.cover {
            1
        } else {
            self.duration_us() as u64 * self.fps as u64 / 1_000_000
        }
    }

    fn total_samples(&self) -> u64 {
        if self.audio {
            self.duration_us() as u64 * self.sample_rate as u64 / 1_000_000
        } else {
            0
        }
    }

    fn frame_ticks(&self, frame: u64) -> i64 {
        (frame * 90_000 / self.fps.max(1) as u64) as i64
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Ignores the path and serves the generated content
#[derive(Debug, Clone, Default)]
pub struct PatternBackend {
    spec: PatternSpec,
}

impl PatternBackend {
    pub fn new(spec: PatternSpec) -> Self {
        Self { spec }
    }
}

impl MediaBackend for PatternBackend {
    fn name(&self) -> &str {
        "pattern"
    }

    fn open(&self, path: &Path) -> Result<OpenedMedia, OpenError> {
        let spec = &self.spec;
        if !spec.video && !spec.audio {
            return Err(OpenError::NoStreams);
        }
        if spec.video && (spec.fps == 0 || spec.gop == 0 || spec.width == 0 || spec.height == 0) {
            return Err(OpenError::UnsupportedCodec("pattern video with zero rate or size".into()));
        }
        if spec.audio && (spec.sample_rate == 0 || spec.chunk_frames == 0) {
            return Err(OpenError::UnsupportedCodec("pattern audio with zero rate".into()));
        }

        tracing::debug!(path = %path.display(), ?spec, "opening test pattern");

        let source = PatternSource::new(spec.clone());
        let video_decoder = spec.video.then(|| {
            let decoder = PatternVideoDecoder::new(spec.width, spec.height, spec.cover);
            Box::new(decoder) as Box<dyn VideoDecoder>
        });
        let audio_decoder = spec.audio.then(|| {
            let decoder = PatternAudioDecoder::new(spec.sample_rate, spec.channels);
            Box::new(decoder) as Box<dyn AudioDecoder>
        });

        Ok(OpenedMedia {
            source: Box::new(source),
            video_decoder,
            audio_decoder,
        })
    }
}

// ============================================================================
// Source
// ============================================================================

pub struct PatternSource {
    spec: PatternSpec,
    video: Option<VideoStreamInfo>,
    audio: Option<AudioStreamInfo>,
    next_frame: u64,
    next_sample: u64,
}

impl PatternSource {
    pub fn new(spec: PatternSpec) -> Self {
        let video = spec.video.then(|| VideoStreamInfo {
            index: VIDEO_STREAM,
            time_base: VIDEO_TIME_BASE,
            width: spec.width,
            height: spec.height,
            avg_frame_rate: if spec.cover {
                Rational::new(0, 1)
            } else {
                Rational::new(spec.fps as i32, 1)
            },
            frame_count: spec.total_frames(),
            comment: spec.cover.then(|| "Cover (front)".to_string()),
        });
        let audio = spec.audio.then(|| AudioStreamInfo {
            index: AUDIO_STREAM,
            time_base: Rational::new(1, spec.sample_rate as i32),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        });

        Self {
            spec,
            video,
            audio,
            next_frame: 0,
            next_sample: 0,
        }
    }

    fn video_packet(&mut self) -> Packet {
        let frame = self.next_frame;
        self.next_frame += 1;

        let keyframe = self.spec.cover || frame % self.spec.gop as u64 == 0;
        let corrupt = !keyframe
            && self
                .spec
                .corrupt_every
                .map(|n| n > 0 && frame % n as u64 == 0)
                .unwrap_or(false);

        let mut flags = 0;
        if keyframe {
            flags |= FLAG_KEYFRAME;
        }
        if corrupt {
            flags |= FLAG_CORRUPT;
        }

        let mut data = BytesMut::with_capacity(9);
        data.put_u64_le(frame);
        data.put_u8(flags);

        Packet {
            stream_index: VIDEO_STREAM,
            pts: Some(self.spec.frame_ticks(frame)),
            duration: self.spec.frame_ticks(1),
            keyframe,
            data: data.freeze(),
        }
    }

    fn audio_packet(&mut self) -> Packet {
        let start = self.next_sample;
        let count = (self.spec.total_samples() - start).min(self.spec.chunk_frames as u64);
        self.next_sample += count;

        let mut data = BytesMut::with_capacity(12);
        data.put_u64_le(start);
        data.put_u32_le(count as u32);

        Packet {
            stream_index: AUDIO_STREAM,
            pts: Some(start as i64),
            duration: count as i64,
            keyframe: true,
            data: data.freeze(),
        }
    }
}

impl MediaSource for PatternSource {
    fn video_stream(&self) -> Option<&VideoStreamInfo> {
        self.video.as_ref()
    }

    fn audio_stream(&self) -> Option<&AudioStreamInfo> {
        self.audio.as_ref()
    }

    fn duration_us(&self) -> i64 {
        self.spec.duration_us()
    }

    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        let video_us = (self.next_frame < self.spec.total_frames())
            .then(|| VIDEO_TIME_BASE.ticks_to_us(self.spec.frame_ticks(self.next_frame)));
        let audio_us = (self.next_sample < self.spec.total_samples())
            .then(|| self.next_sample as i64 * 1_000_000 / self.spec.sample_rate as i64);

        match (video_us, audio_us) {
            (None, None) => Err(ReadError::EndOfStream),
            (Some(v), Some(a)) if a < v => Ok(self.audio_packet()),
            (Some(_), _) => Ok(self.video_packet()),
            (None, Some(_)) => Ok(self.audio_packet()),
        }
    }

    fn seek(&mut self, target_us: i64) -> Result<(), SeekError> {
        let target_us = target_us.clamp(0, self.spec.duration_us());

        let anchor_us = if self.spec.video && !self.spec.cover {
            let total = self.spec.total_frames();
            let frame = (target_us as u64 * self.spec.fps as u64 / 1_000_000)
                .min(total.saturating_sub(1));
            let key = frame / self.spec.gop as u64 * self.spec.gop as u64;
            self.next_frame = key;
            VIDEO_TIME_BASE.ticks_to_us(self.spec.frame_ticks(key))
        } else {
            // The cover is shown again after every seek
            self.next_frame = 0;
            target_us
        };

        if self.spec.audio {
            let chunk = self.spec.chunk_frames as u64;
            let sample = anchor_us as u64 * self.spec.sample_rate as u64 / 1_000_000;
            self.next_sample = (sample / chunk * chunk).min(self.spec.total_samples());
        }

        tracing::debug!(target_us, anchor_us, "pattern seek");
        Ok(())
    }
}

// ============================================================================
// Decoders
// ============================================================================

pub struct PatternVideoDecoder {
    width: u32,
    height: u32,
    /// Hold output until drained, like a codec with delay
    delayed: bool,
    held: Vec<RawVideoFrame>,
    needs_keyframe: bool,
}

impl PatternVideoDecoder {
    pub fn new(width: u32, height: u32, delayed: bool) -> Self {
        Self {
            width,
            height,
            delayed,
            held: Vec::new(),
            needs_keyframe: true,
        }
    }

    fn render(&self, frame: u64) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let mut data = vec![0u8; w * h + cw * ch * 2];

        let shift = (frame * 2) as usize;
        for y in 0..h {
            for x in 0..w {
                data[y * w + x] = 16 + ((x + y + shift) % 220) as u8;
            }
        }
        let (_, chroma) = data.split_at_mut(w * h);
        let (u, v) = chroma.split_at_mut(cw * ch);
        for x in 0..cw {
            let bar = (x * 8 / cw.max(1)) as u8;
            for y in 0..ch {
                u[y * cw + x] = 128u8.wrapping_add(bar * 12);
                v[y * cw + x] = 128u8.wrapping_sub(bar * 12);
            }
        }
        data
    }
}

impl VideoDecoder for PatternVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawVideoFrame>, DecodeError> {
        let mut data = packet.data.clone();
        if data.remaining() < 9 {
            return Err(DecodeError::Corrupt(format!("{} byte video packet", data.len())));
        }
        let frame = data.get_u64_le();
        let flags = data.get_u8();

        if flags & FLAG_CORRUPT != 0 {
            return Err(DecodeError::Corrupt(format!("frame {frame}")));
        }
        if self.needs_keyframe && flags & FLAG_KEYFRAME == 0 {
            return Err(DecodeError::NeedKeyframe);
        }
        self.needs_keyframe = false;

        let decoded = RawVideoFrame {
            data: self.render(frame),
            format: PixelFormat::Yuv420p,
            width: self.width,
            height: self.height,
            pts: packet.pts,
        };
        if self.delayed {
            self.held.push(decoded);
            Ok(Vec::new())
        } else {
            Ok(vec![decoded])
        }
    }

    fn drain(&mut self) -> Result<Vec<RawVideoFrame>, DecodeError> {
        Ok(std::mem::take(&mut self.held))
    }

    fn flush(&mut self) {
        self.held.clear();
        self.needs_keyframe = true;
    }

    fn name(&self) -> &str {
        "pattern-video"
    }
}

pub struct PatternAudioDecoder {
    sample_rate: u32,
    channels: u16,
}

impl PatternAudioDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
        }
    }
}

impl AudioDecoder for PatternAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>, DecodeError> {
        let mut data: Bytes = packet.data.clone();
        if data.remaining() < 12 {
            return Err(DecodeError::Corrupt(format!("{} byte audio packet", data.len())));
        }
        let start = data.get_u64_le();
        let count = data.get_u32_le() as u64;

        let channels = self.channels as usize;
        let mut samples = Vec::with_capacity(count as usize * channels);
        for n in start..start + count {
            let t = n as f32 / self.sample_rate as f32;
            let s = 0.25 * (TAU * TONE_HZ * t).sin();
            samples.extend(std::iter::repeat(s).take(channels));
        }

        Ok(vec![AudioFrame {
            samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
            pts: packet.pts,
        }])
    }

    fn flush(&mut self) {}

    fn name(&self) -> &str {
        "pattern-audio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_spec() -> PatternSpec {
        PatternSpec::default().with_duration(Duration::from_secs(2))
    }

    fn packet_us(source: &PatternSource, packet: &Packet) -> i64 {
        let tb = if packet.stream_index == VIDEO_STREAM {
            source.video_stream().unwrap().time_base
        } else {
            source.audio_stream().unwrap().time_base
        };
        tb.ticks_to_us(packet.pts.unwrap())
    }

    #[test]
    fn test_packets_interleave_by_time() {
        let mut source = PatternSource::new(short_spec());
        let (mut video, mut audio, mut last_us) = (0, 0, 0);
        loop {
            match source.read_packet() {
                Ok(p) => {
                    let us = packet_us(&source, &p);
                    assert!(us >= last_us, "{us} after {last_us}");
                    last_us = us;
                    if p.stream_index == VIDEO_STREAM {
                        video += 1;
                    } else {
                        audio += 1;
                    }
                }
                Err(ReadError::EndOfStream) => break,
                Err(e) => panic!("{e}"),
            }
        }
        assert_eq!(video, 60);
        assert_eq!(audio, 40);
    }

    #[test]
    fn test_seek_lands_on_keyframe() {
        let mut source = PatternSource::new(PatternSpec::default());
        source.seek(7_300_000).unwrap();

        // Video wins the tie at the keyframe time
        let video = source.read_packet().unwrap();
        assert_eq!(video.stream_index, VIDEO_STREAM);
        assert!(video.keyframe);
        assert_eq!(packet_us(&source, &video), 7_000_000);

        let audio = source.read_packet().unwrap();
        assert_eq!(audio.stream_index, AUDIO_STREAM);
        assert!(packet_us(&source, &audio) <= 7_000_000);
    }

    #[test]
    fn test_decoder_needs_keyframe_after_flush() {
        let mut source = PatternSource::new(short_spec().video_only());
        let mut decoder = PatternVideoDecoder::new(64, 36, false);

        let key = source.read_packet().unwrap();
        let delta = source.read_packet().unwrap();
        assert_eq!(decoder.decode(&key).unwrap().len(), 1);
        assert_eq!(decoder.decode(&delta).unwrap().len(), 1);

        decoder.flush();
        assert!(matches!(decoder.decode(&delta), Err(DecodeError::NeedKeyframe)));
        let frame = decoder.decode(&key).unwrap().remove(0);
        assert_eq!(frame.data.len(), PixelFormat::Yuv420p.buffer_size(64, 36));
    }

    #[test]
    fn test_cover_frame_comes_from_drain() {
        let backend = PatternBackend::new(short_spec().with_cover());
        let mut media = backend.open(Path::new("cover.m4a")).unwrap();
        let info = media.info().unwrap();
        assert!(info.is_cover());
        assert!(info.has_audio());

        let mut decoder = media.video_decoder.take().unwrap();
        let packet = loop {
            let p = media.source.read_packet().unwrap();
            if p.stream_index == VIDEO_STREAM {
                break p;
            }
        };
        assert!(decoder.decode(&packet).unwrap().is_empty());
        assert_eq!(decoder.drain().unwrap().len(), 1);
        assert!(decoder.drain().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_packets_fail_to_decode() {
        let spec = PatternSpec {
            corrupt_every: Some(4),
            ..short_spec().video_only()
        };
        let mut source = PatternSource::new(spec);
        let mut decoder = PatternVideoDecoder::new(64, 36, false);
        let mut failures = 0;
        while let Ok(p) = source.read_packet() {
            if decoder.decode(&p).is_err() {
                failures += 1;
            }
        }
        // Frames 4, 8, ... except keyframes 0 and 30
        assert_eq!(failures, 14);
    }

    #[test]
    fn test_audio_tone() {
        let mut decoder = PatternAudioDecoder::new(8_000, 2);
        let mut source = PatternSource::new(short_spec().audio_only());
        let frames = decoder.decode(&source.read_packet().unwrap()).unwrap();
        assert_eq!(frames[0].frames(), 400);
        assert!(frames[0].samples.iter().all(|s| s.abs() <= 0.25));
        assert_eq!(frames[0].samples[2], frames[0].samples[3]);
    }

    #[test]
    fn test_open_without_streams_fails() {
        let spec = PatternSpec {
            video: false,
            audio: false,
            ..PatternSpec::default()
        };
        let backend = PatternBackend::new(spec);
        assert!(matches!(backend.open(Path::new("x")), Err(OpenError::NoStreams)));
    }
}
