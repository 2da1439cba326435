//! # Audio Device Layer
//!
//! The audio worker talks to a buffer-queue style sink: queue whole PCM
//! buffers, ask how many have been fully played, play/pause/stop.
//!
//! Devices come from an [`AudioDeviceRegistry`]. The registry opens the
//! device when the first session needs it and closes it when the last
//! [`DeviceLease`] is dropped, all under one mutex.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::pcm::BYTES_PER_FRAME;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No audio output device available")]
    NoDevice,
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("Audio device error: {0}")]
    Backend(String),
}

/// 16-bit interleaved stereo at `sample_rate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
}

impl PcmFormat {
    pub fn buffer_duration(&self, bytes: usize) -> Duration {
        let frames = (bytes / BYTES_PER_FRAME) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// One output voice. Created and used on the audio worker's thread only.
pub trait AudioSink {
    /// Append one buffer behind everything already queued
    fn queue(&mut self, pcm: &[u8]) -> Result<(), DeviceError>;

    /// Buffers fully played since the previous call
    fn processed(&mut self) -> usize;

    /// Buffers queued and not yet reported as processed
    fn queued(&self) -> usize;

    fn play(&mut self) -> Result<(), DeviceError>;

    fn pause(&mut self);

    /// Halt and discard everything queued
    fn stop(&mut self);
}

pub trait AudioDevice: Send + Sync {
    fn name(&self) -> &str;

    fn open_sink(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>, DeviceError>;
}

type DeviceFactory = dyn Fn() -> Result<Arc<dyn AudioDevice>, DeviceError> + Send + Sync;

// ============================================================================
// Registry
// ============================================================================

struct RegistryInner {
    device: Option<Arc<dyn AudioDevice>>,
    refs: usize,
    opened: u64,
}

/// Reference-counted owner of the output device
pub struct AudioDeviceRegistry {
    factory: Box<DeviceFactory>,
    inner: Mutex<RegistryInner>,
}

impl AudioDeviceRegistry {
    pub fn new<F>(factory: F) -> Arc<Self>
    where
        F: Fn() -> Result<Arc<dyn AudioDevice>, DeviceError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            factory: Box::new(factory),
            inner: Mutex::new(RegistryInner {
                device: None,
                refs: 0,
                opened: 0,
            }),
        })
    }

    /// Registry over the wall-clock software device
    pub fn clocked() -> Arc<Self> {
        Self::new(|| Ok(Arc::new(ClockedAudioDevice::new()) as Arc<dyn AudioDevice>))
    }

    /// Registry over the system's default output
    #[cfg(feature = "audio")]
    pub fn system() -> Arc<Self> {
        Self::new(|| {
            crate::cpal_device::CpalAudioDevice::default_output()
                .map(|d| Arc::new(d) as Arc<dyn AudioDevice>)
        })
    }

    /// Take a reference, opening the device if nobody holds one
    pub fn acquire(self: &Arc<Self>) -> Result<DeviceLease, DeviceError> {
        let mut inner = self.inner.lock();
        let device = match &inner.device {
            Some(device) => device.clone(),
            None => {
                let device = (self.factory)()?;
                inner.opened += 1;
                tracing::info!(device = device.name(), "audio device opened");
                inner.device = Some(device.clone());
                device
            }
        };
        inner.refs += 1;
        Ok(DeviceLease {
            registry: self.clone(),
            device,
        })
    }

    pub fn ref_count(&self) -> usize {
        self.inner.lock().refs
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().device.is_some()
    }

    /// How many times the device has been (re)opened
    pub fn open_count(&self) -> u64 {
        self.inner.lock().opened
    }

    fn release(&self) {
        let mut inner = self.inner.lock();
        inner.refs = inner.refs.saturating_sub(1);
        if inner.refs == 0 {
            if let Some(device) = inner.device.take() {
                tracing::info!(device = device.name(), "audio device released");
            }
        }
    }
}

/// Scoped hold on the registry's device
pub struct DeviceLease {
    registry: Arc<AudioDeviceRegistry>,
    device: Arc<dyn AudioDevice>,
}

impl DeviceLease {
    pub fn device(&self) -> &dyn AudioDevice {
        self.device.as_ref()
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.registry.release();
    }
}

// ============================================================================
// Clocked software device
// ============================================================================

/// Consumes queued audio in real time without producing sound.
/// Used headless and in tests.
#[derive(Debug, Default)]
pub struct ClockedAudioDevice;

impl ClockedAudioDevice {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDevice for ClockedAudioDevice {
    fn name(&self) -> &str {
        "clocked"
    }

    fn open_sink(&self, format: PcmFormat) -> Result<Box<dyn AudioSink>, DeviceError> {
        if format.sample_rate == 0 {
            return Err(DeviceError::UnsupportedFormat("0 Hz".into()));
        }
        Ok(Box::new(ClockedSink::new(format)))
    }
}

pub struct ClockedSink {
    format: PcmFormat,
    pending: VecDeque<Duration>,
    played: Duration,
    resumed_at: Option<Instant>,
}

impl ClockedSink {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            pending: VecDeque::new(),
            played: Duration::ZERO,
            resumed_at: None,
        }
    }

    fn advance(&mut self) {
        if let Some(at) = self.resumed_at {
            let now = Instant::now();
            // Time only counts while there is something to play
            if !self.pending.is_empty() {
                self.played += now - at;
            }
            self.resumed_at = Some(now);
        }
    }
}

impl AudioSink for ClockedSink {
    fn queue(&mut self, pcm: &[u8]) -> Result<(), DeviceError> {
        self.advance();
        self.pending.push_back(self.format.buffer_duration(pcm.len()));
        Ok(())
    }

    fn processed(&mut self) -> usize {
        self.advance();
        let mut n = 0;
        while let Some(&front) = self.pending.front() {
            if self.played < front {
                break;
            }
            self.played -= front;
            self.pending.pop_front();
            n += 1;
        }
        if self.pending.is_empty() {
            self.played = Duration::ZERO;
        }
        n
    }

    fn queued(&self) -> usize {
        self.pending.len()
    }

    fn play(&mut self) -> Result<(), DeviceError> {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.advance();
        self.resumed_at = None;
    }

    fn stop(&mut self) {
        self.resumed_at = None;
        self.pending.clear();
        self.played = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const FORMAT: PcmFormat = PcmFormat { sample_rate: 8_000 };

    #[test]
    fn test_registry_refcount() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = {
            let created = created.clone();
            AudioDeviceRegistry::new(move || {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(ClockedAudioDevice::new()) as Arc<dyn AudioDevice>)
            })
        };

        let a = registry.acquire().unwrap();
        let b = registry.acquire().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.ref_count(), 2);
        assert_eq!(a.device().name(), "clocked");

        drop(a);
        assert!(registry.is_open());
        drop(b);
        assert!(!registry.is_open());
        assert_eq!(registry.ref_count(), 0);

        let _c = registry.acquire().unwrap();
        assert_eq!(registry.open_count(), 2);
    }

    #[test]
    fn test_registry_failure_leaves_no_reference() {
        let registry = AudioDeviceRegistry::new(|| Err(DeviceError::NoDevice));
        assert!(matches!(registry.acquire(), Err(DeviceError::NoDevice)));
        assert_eq!(registry.ref_count(), 0);
    }

    #[test]
    fn test_clocked_sink_consumes_in_real_time() {
        let mut sink = ClockedSink::new(FORMAT);
        // 20ms buffers at 8kHz stereo 16-bit
        let buf = vec![0u8; 160 * BYTES_PER_FRAME];
        for _ in 0..4 {
            sink.queue(&buf).unwrap();
        }
        assert_eq!(sink.processed(), 0);

        sink.play().unwrap();
        thread::sleep(Duration::from_millis(50));
        let done = sink.processed();
        assert!((2..=4).contains(&done), "processed {done}");
        assert_eq!(sink.queued(), 4 - done);
    }

    #[test]
    fn test_clocked_sink_pause_and_stop() {
        let mut sink = ClockedSink::new(FORMAT);
        let buf = vec![0u8; 80 * BYTES_PER_FRAME];
        sink.queue(&buf).unwrap();
        sink.queue(&buf).unwrap();

        sink.pause();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.processed(), 0);

        sink.stop();
        assert_eq!(sink.queued(), 0);
        assert_eq!(sink.processed(), 0);
    }
}
