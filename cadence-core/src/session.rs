//! State shared by the three workers of one playback session

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::command::CommandQueue;
use crate::config::PlayerConfig;
use crate::events::EventSender;
use crate::queue::QueueSet;
use crate::source::{MediaInfo, VideoDecoder};
use crate::state::PlaybackState;

/// The video decoder is driven by the video worker and flushed by the demux
/// worker during a seek. Holding the lock is what "currently decoding" means.
pub(crate) type SharedVideoDecoder = Arc<Mutex<Box<dyn VideoDecoder>>>;

pub(crate) struct Session {
    pub state: PlaybackState,
    pub queues: QueueSet,
    pub info: MediaInfo,
    pub config: PlayerConfig,
    pub events: EventSender,
    pub commands: CommandQueue,
    pub seek_offset_us: AtomicI64,
}

impl Session {
    pub fn new(
        info: MediaInfo,
        config: PlayerConfig,
        events: EventSender,
        seek_offset: Duration,
    ) -> Self {
        let state = PlaybackState::new();
        // Nothing to wait for on a side that does not exist
        if !info.has_video() {
            state.video_ready.set(true);
            state.video_end.store(true, Ordering::SeqCst);
        }
        if !info.has_audio() {
            state.audio_ready.set(true);
            state.audio_end.store(true, Ordering::SeqCst);
        } else {
            state.audio_clock_live.store(true, Ordering::SeqCst);
        }

        Self {
            state,
            queues: QueueSet::new(),
            info,
            config,
            events,
            commands: CommandQueue::new(),
            seek_offset_us: AtomicI64::new(seek_offset.as_micros() as i64),
        }
    }

    pub fn poll(&self) -> Duration {
        self.config.poll_interval()
    }

    pub fn should_end(&self) -> bool {
        self.state.should_end()
    }

    /// The authoritative playback position in microseconds.
    ///
    /// Audio drives the clock while it is live, and always for audio-only
    /// and cover sessions; otherwise the last presented video frame does.
    /// Across a seek both hold their last value until the new segment
    /// publishes one.
    pub fn master_pts(&self) -> i64 {
        let state = &self.state;
        let audio_master = self.info.has_audio()
            && (state.audio_clock_live.load(Ordering::SeqCst) || !self.info.has_motion_video());
        if audio_master {
            state.audio_pts.load(Ordering::SeqCst)
        } else {
            state.video_pts.load(Ordering::SeqCst)
        }
    }

    pub fn fps(&self) -> f64 {
        self.info.fps(self.config.fallback_fps)
    }

    pub fn seek_offset_us(&self) -> i64 {
        self.seek_offset_us.load(Ordering::SeqCst)
    }
}
