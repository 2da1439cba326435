// symphonia backend: audio files (wav, flac, mp3, ogg/vorbis, aac/m4a, ...)
//
// symphonia only decodes audio, so files opened here never carry a video
// stream and play with the audio clock as master.

use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::source::{
    AudioDecoder, AudioFrame, AudioStreamInfo, DecodeError, MediaBackend, MediaSource, OpenError,
    OpenedMedia, Packet, Rational, ReadError, SeekError, VideoStreamInfo,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaBackend;

impl SymphoniaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for SymphoniaBackend {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn open(&self, path: &Path) -> Result<OpenedMedia, OpenError> {
        let file = File::open(path).map_err(|source| OpenError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| OpenError::Probe(e.to_string()))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(OpenError::NoStreams)?;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| OpenError::UnsupportedCodec("unknown sample rate".into()))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let time_base = params
            .time_base
            .map(|tb| Rational::new(tb.numer as i32, tb.denom as i32))
            .unwrap_or(Rational::new(1, sample_rate as i32));
        let duration_us = params
            .n_frames
            .map(|n| time_base.ticks_to_us(n as i64))
            .unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| OpenError::UnsupportedCodec(e.to_string()))?;

        let audio = AudioStreamInfo {
            index: track.id as usize,
            time_base,
            sample_rate,
            channels,
        };
        let track_id = track.id;

        tracing::info!(
            path = %path.display(),
            codec = ?decoder.codec_params().codec,
            sample_rate,
            channels,
            duration_us,
            "symphonia opened audio track"
        );

        Ok(OpenedMedia {
            source: Box::new(SymphoniaSource {
                reader,
                track_id,
                audio,
                duration_us,
            }),
            video_decoder: None,
            audio_decoder: Some(Box::new(SymphoniaAudioDecoder { decoder, track_id })),
        })
    }
}

pub struct SymphoniaSource {
    reader: Box<dyn FormatReader>,
    track_id: u32,
    audio: AudioStreamInfo,
    duration_us: i64,
}

impl MediaSource for SymphoniaSource {
    fn video_stream(&self) -> Option<&VideoStreamInfo> {
        None
    }

    fn audio_stream(&self) -> Option<&AudioStreamInfo> {
        Some(&self.audio)
    }

    fn duration_us(&self) -> i64 {
        self.duration_us
    }

    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        match self.reader.next_packet() {
            Ok(packet) => Ok(Packet {
                stream_index: packet.track_id() as usize,
                pts: Some(packet.ts() as i64),
                duration: packet.dur() as i64,
                keyframe: true,
                data: Bytes::from(packet.data.into_vec()),
            }),
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ReadError::EndOfStream)
            }
            Err(e) => Err(ReadError::Io(e.to_string())),
        }
    }

    fn seek(&mut self, target_us: i64) -> Result<(), SeekError> {
        let seek_to = SeekTo::Time {
            time: Time::from(target_us.max(0) as f64 / 1_000_000.0),
            track_id: Some(self.track_id),
        };
        let seeked = self
            .reader
            .seek(SeekMode::Coarse, seek_to)
            .map_err(|e| SeekError::Failed {
                target_us,
                reason: e.to_string(),
            })?;
        tracing::debug!(
            target_us,
            actual_ts = seeked.actual_ts,
            required_ts = seeked.required_ts,
            "symphonia seek"
        );
        Ok(())
    }
}

pub struct SymphoniaAudioDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>, DecodeError> {
        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let sym_packet = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            ts,
            packet.duration.max(0) as u64,
            &packet.data,
        );

        let decoded = match self.decoder.decode(&sym_packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => return Err(DecodeError::Corrupt(e.to_string())),
            Err(e) => return Err(DecodeError::Backend(e.to_string())),
        };

        let spec = *decoded.spec();
        if decoded.frames() == 0 {
            return Ok(Vec::new());
        }
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);

        Ok(vec![AudioFrame {
            samples: buf.samples().to_vec(),
            channels: spec.channels.count() as u16,
            sample_rate: spec.rate,
            pts: packet.pts,
        }])
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }

    fn name(&self) -> &str {
        "symphonia"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tone(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for n in 0..8_000 * seconds {
            let s = ((n as f32 * 0.3).sin() * 8_000.0) as i16;
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_open_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone(&path, 1);

        let mut media = SymphoniaBackend::new().open(&path).unwrap();
        let info = media.info().unwrap();
        assert!(!info.has_video());
        let audio = info.audio.unwrap();
        assert_eq!(audio.sample_rate, 8_000);
        assert_eq!(audio.channels, 2);
        assert!((info.duration_us - 1_000_000).abs() < 1_000);

        let mut decoder = media.audio_decoder.take().unwrap();
        let mut frames = 0;
        loop {
            match media.source.read_packet() {
                Ok(packet) => {
                    for frame in decoder.decode(&packet).unwrap() {
                        assert_eq!(frame.channels, 2);
                        frames += frame.frames();
                    }
                }
                Err(ReadError::EndOfStream) => break,
                Err(e) => panic!("{e}"),
            }
        }
        assert_eq!(frames, 8_000);
    }

    #[test]
    fn test_seek_moves_backward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone(&path, 2);

        let mut media = SymphoniaBackend::new().open(&path).unwrap();
        for _ in 0..20 {
            media.source.read_packet().unwrap();
        }
        media.source.seek(500_000).unwrap();
        let packet = media.source.read_packet().unwrap();
        let ts = packet.pts.unwrap();
        assert!(ts > 0 && ts <= 4_000, "landed at {ts}");
    }

    #[test]
    fn test_missing_file() {
        let result = SymphoniaBackend::new().open(Path::new("/nonexistent/cadence.wav"));
        assert!(matches!(result, Err(OpenError::Io { .. })));
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, vec![0x5a; 4096]).unwrap();
        assert!(matches!(
            SymphoniaBackend::new().open(&path),
            Err(OpenError::Probe(_))
        ));
    }
}
