// cpal output for the audio worker
//
// PCM buffers are pushed into a ring (ringbuf) that the cpal callback
// drains. The callback counts frames actually played; buffer boundaries
// recorded at queue time turn that count back into "buffers processed".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::device::{AudioDevice, AudioSink, DeviceError, PcmFormat};

/// The host's default output device
pub struct CpalAudioDevice {
    name: String,
}

impl CpalAudioDevice {
    pub fn default_output() -> Result<Self, DeviceError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(DeviceError::NoDevice)?;
        let name = device.name().unwrap_or_else(|_| "default".to_string());
        Ok(Self { name })
    }
}

impl AudioDevice for CpalAudioDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_sink(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>, DeviceError> {
        Ok(Box::new(CpalSink::open(format)?))
    }
}

#[derive(Default)]
struct CallbackState {
    playing: AtomicBool,
    /// Stereo frames handed to the device
    played: AtomicU64,
    flush: AtomicBool,
    flush_to: AtomicU64,
}

pub struct CpalSink {
    stream: Stream,
    producer: HeapProd<f32>,
    state: Arc<CallbackState>,
    /// Samples that did not fit in the ring yet
    backlog: VecDeque<f32>,
    /// Cumulative frame position at the end of each queued buffer
    boundaries: VecDeque<u64>,
    pushed: u64,
}

impl CpalSink {
    fn open(format: PcmFormat) -> Result<Self, DeviceError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(DeviceError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let channels = supported.channels().max(1);
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Two seconds of stereo
        let ring = HeapRb::<f32>::new(format.sample_rate as usize * 2 * 2);
        let (producer, consumer) = ring.split();
        let state = Arc::new(CallbackState::default());

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, state.clone())?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, state.clone())?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, state.clone())?,
            other => return Err(DeviceError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream
            .play()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        Ok(Self {
            stream,
            producer,
            state,
            backlog: VecDeque::new(),
            boundaries: VecDeque::new(),
            pushed: 0,
        })
    }

    fn top_up(&mut self) {
        let room = self.producer.vacant_len() & !1;
        let n = room.min(self.backlog.len());
        for sample in self.backlog.drain(..n) {
            let _ = self.producer.try_push(sample);
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    state: Arc<CallbackState>,
) -> Result<Stream, DeviceError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = |err| tracing::error!("audio stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if state.flush.load(Ordering::SeqCst) {
                    while consumer.try_pop().is_some() {}
                    state.played.store(state.flush_to.load(Ordering::SeqCst), Ordering::SeqCst);
                    state.flush.store(false, Ordering::SeqCst);
                }

                let playing = state.playing.load(Ordering::SeqCst);
                let mut frames = 0u64;
                for out in data.chunks_mut(channels) {
                    let (l, r) = if playing && consumer.occupied_len() >= 2 {
                        frames += 1;
                        (
                            consumer.try_pop().unwrap_or(0.0),
                            consumer.try_pop().unwrap_or(0.0),
                        )
                    } else {
                        (0.0, 0.0)
                    };
                    for (i, sample) in out.iter_mut().enumerate() {
                        let v = match i {
                            0 => l,
                            1 => r,
                            _ => (l + r) * 0.5,
                        };
                        *sample = T::from_sample(v);
                    }
                }
                state.played.fetch_add(frames, Ordering::SeqCst);
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Backend(e.to_string()))
}

impl AudioSink for CpalSink {
    fn queue(&mut self, pcm: &[u8]) -> Result<(), DeviceError> {
        let frames = (pcm.len() / 4) as u64;
        self.backlog.extend(
            pcm.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32),
        );
        self.pushed += frames;
        self.boundaries.push_back(self.pushed);
        self.top_up();
        Ok(())
    }

    fn processed(&mut self) -> usize {
        self.top_up();
        if self.state.flush.load(Ordering::SeqCst) {
            return 0;
        }
        let played = self.state.played.load(Ordering::SeqCst);
        let mut n = 0;
        while let Some(&end) = self.boundaries.front() {
            if end > played {
                break;
            }
            self.boundaries.pop_front();
            n += 1;
        }
        n
    }

    fn queued(&self) -> usize {
        self.boundaries.len()
    }

    fn play(&mut self) -> Result<(), DeviceError> {
        self.state.playing.store(true, Ordering::SeqCst);
        self.stream
            .play()
            .map_err(|e| DeviceError::Backend(e.to_string()))
    }

    fn pause(&mut self) {
        self.state.playing.store(false, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.state.playing.store(false, Ordering::SeqCst);
        self.backlog.clear();
        self.boundaries.clear();
        self.state.flush_to.store(self.pushed, Ordering::SeqCst);
        self.state.flush.store(true, Ordering::SeqCst);

        // The callback acknowledges the flush on its next period
        let deadline = Instant::now() + Duration::from_millis(200);
        while self.state.flush.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }
}
