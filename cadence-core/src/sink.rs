//! Video sink - where presented frames go
//!
//! The renderer lives outside the core. All it has to accept is an RGB24
//! buffer of known size; the "frame ready" event then tells the shell to
//! redraw.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A frame ready for display
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Tightly packed RGB24
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts_us: i64,
}

pub trait VideoSink: Send + Sync {
    fn present(&self, frame: VideoFrame);
}

/// Keeps only the most recently presented frame
#[derive(Default)]
pub struct LatestFrameSink {
    latest: Mutex<Option<VideoFrame>>,
    presented: AtomicU64,
}

impl LatestFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the newest frame, if one arrived since the last take
    pub fn take(&self) -> Option<VideoFrame> {
        self.latest.lock().take()
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl VideoSink for LatestFrameSink {
    fn present(&self, frame: VideoFrame) {
        *self.latest.lock() = Some(frame);
        self.presented.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pts_us: i64) -> VideoFrame {
        VideoFrame {
            rgb: vec![0; 12],
            width: 2,
            height: 2,
            pts_us,
        }
    }

    #[test]
    fn test_latest_frame_wins() {
        let sink = LatestFrameSink::new();
        sink.present(frame(1));
        sink.present(frame(2));
        assert_eq!(sink.presented(), 2);
        assert_eq!(sink.take().map(|f| f.pts_us), Some(2));
        assert!(sink.take().is_none());
    }
}
