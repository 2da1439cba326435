//! Playback state shared by the three workers
//!
//! Decoder status is a phase (`Reading`, `Eof`, ...) plus an optional seek
//! in flight. Only the demux worker ever clears a pending seek. Everything
//! else the workers coordinate on is an atomic scalar or a [`Flag`].

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

// ============================================================================
// Status Types
// ============================================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayStatus {
    Unknown = 0,
    Playing = 1,
    Paused = 2,
    Stopped = 3,
}

impl PlayStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            2 => Self::Paused,
            3 => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// Where the demux worker is in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderPhase {
    Unknown,
    Reading,
    Eof,
    Stopped,
}

/// A seek waiting for (or being executed by) the demux worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekKind {
    /// Forward by the configured offset
    Advance,
    /// Backward by the configured offset
    Back,
    /// Absolute target in microseconds
    Goto(i64),
}

/// Observable decoder status: the phase, overridden by any seek in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecoderStatus {
    Unknown,
    Reading,
    Eof,
    Advance,
    Back,
    Goto,
    Stop,
}

impl DecoderStatus {
    /// A seek is executing; new seeks and resume are refused
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Advance | Self::Back | Self::Goto)
    }

    /// The player accepts control operations
    pub fn can_operate(self) -> bool {
        matches!(self, Self::Reading | Self::Eof)
    }
}

#[derive(Debug, Clone, Copy)]
struct DecoderState {
    phase: DecoderPhase,
    seek: Option<SeekKind>,
    /// Set while a seek owns the play status: whether to stay paused after it
    held_pause: Option<bool>,
}

impl DecoderState {
    fn status(&self) -> DecoderStatus {
        match (self.seek, self.phase) {
            (Some(SeekKind::Advance), _) => DecoderStatus::Advance,
            (Some(SeekKind::Back), _) => DecoderStatus::Back,
            (Some(SeekKind::Goto(_)), _) => DecoderStatus::Goto,
            (None, DecoderPhase::Unknown) => DecoderStatus::Unknown,
            (None, DecoderPhase::Reading) => DecoderStatus::Reading,
            (None, DecoderPhase::Eof) => DecoderStatus::Eof,
            (None, DecoderPhase::Stopped) => DecoderStatus::Stop,
        }
    }
}

// ============================================================================
// Flag
// ============================================================================

/// A boolean that can be waited on
#[derive(Debug, Default)]
pub struct Flag {
    value: Mutex<bool>,
    cond: Condvar,
}

impl Flag {
    pub fn new(value: bool) -> Self {
        Self {
            value: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    pub fn get(&self) -> bool {
        *self.value.lock()
    }

    pub fn set(&self, value: bool) {
        *self.value.lock() = value;
        self.cond.notify_all();
    }

    /// Wait until the flag equals `expected` or `timeout` elapses.
    /// Returns whether the flag has the expected value.
    pub fn wait_for(&self, expected: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut value = self.value.lock();

        while *value != expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.cond.wait_for(&mut value, remaining);
        }

        true
    }

    pub fn wake(&self) {
        self.cond.notify_all();
    }
}

// ============================================================================
// Playback State
// ============================================================================

pub struct PlaybackState {
    decoder: Mutex<DecoderState>,
    decoder_cond: Condvar,
    play_status: AtomicU8,

    /// Global cancellation, read by every worker loop
    pub should_end: AtomicBool,
    pub video_should_flush: AtomicBool,
    pub audio_should_flush: AtomicBool,
    /// Video pipeline has nothing left to present at EOF
    pub video_end: AtomicBool,
    /// Audio pipeline has played everything at EOF
    pub audio_end: AtomicBool,

    /// Master clock when audio is present (microseconds)
    pub audio_pts: AtomicI64,
    /// Pts of the last delivered video frame (microseconds)
    pub video_pts: AtomicI64,
    /// Audio clock still gates video; cleared once audio drains at EOF
    pub audio_clock_live: AtomicBool,
    /// `audio_pts` comes from a buffer of the current segment
    pub audio_clock_valid: AtomicBool,
    /// The audio worker is alive and able to answer seek handshakes
    pub audio_running: AtomicBool,

    /// Audio worker parked (paused or waiting out a seek)
    pub audio_waiting: Flag,
    pub video_ready: Flag,
    pub audio_ready: Flag,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            decoder: Mutex::new(DecoderState {
                phase: DecoderPhase::Unknown,
                seek: None,
                held_pause: None,
            }),
            decoder_cond: Condvar::new(),
            play_status: AtomicU8::new(PlayStatus::Unknown as u8),
            should_end: AtomicBool::new(false),
            video_should_flush: AtomicBool::new(false),
            audio_should_flush: AtomicBool::new(false),
            video_end: AtomicBool::new(false),
            audio_end: AtomicBool::new(false),
            audio_pts: AtomicI64::new(0),
            video_pts: AtomicI64::new(0),
            audio_clock_live: AtomicBool::new(false),
            audio_clock_valid: AtomicBool::new(false),
            audio_running: AtomicBool::new(false),
            audio_waiting: Flag::new(false),
            video_ready: Flag::new(false),
            audio_ready: Flag::new(false),
        }
    }

    // ========================================================================
    // Decoder status
    // ========================================================================

    pub fn decoder_status(&self) -> DecoderStatus {
        self.decoder.lock().status()
    }

    pub fn decoder_phase(&self) -> DecoderPhase {
        self.decoder.lock().phase
    }

    pub fn is_busy(&self) -> bool {
        self.decoder.lock().seek.is_some()
    }

    pub fn set_phase(&self, phase: DecoderPhase) {
        self.decoder.lock().phase = phase;
        self.decoder_cond.notify_all();
    }

    /// Queue a seek for the demux worker.
    ///
    /// Refused unless the decoder is `Reading` or `Eof` with no seek in flight.
    pub fn request_seek(&self, kind: SeekKind) -> bool {
        let mut decoder = self.decoder.lock();
        if !decoder.status().can_operate() {
            return false;
        }
        decoder.seek = Some(kind);
        drop(decoder);
        self.decoder_cond.notify_all();
        true
    }

    pub fn pending_seek(&self) -> Option<SeekKind> {
        self.decoder.lock().seek
    }

    /// The demux worker takes over the play status for the length of a seek.
    ///
    /// Playback is forced to `Paused`; whether it was already paused (or gets
    /// paused while the seek runs) decides the status [`finish_seek`] restores.
    ///
    /// [`finish_seek`]: Self::finish_seek
    pub fn hold_for_seek(&self) {
        let mut decoder = self.decoder.lock();
        let previous = self
            .play_status
            .swap(PlayStatus::Paused as u8, Ordering::SeqCst);
        decoder.held_pause = Some(previous == PlayStatus::Paused as u8);
    }

    /// Seek done: back to `Reading`, and back to `Playing` unless a pause
    /// was requested before or during the seek
    pub fn finish_seek(&self) {
        let mut decoder = self.decoder.lock();
        decoder.seek = None;
        decoder.phase = DecoderPhase::Reading;
        if decoder.held_pause.take() == Some(false) {
            self.set_play_status(PlayStatus::Playing);
        }
        drop(decoder);
        self.decoder_cond.notify_all();
    }

    /// Block while the decoder sits at EOF with nothing requested.
    ///
    /// Wakes every `poll` to observe shutdown.
    pub fn wait_while_eof(&self, poll: Duration) {
        let mut decoder = self.decoder.lock();
        while decoder.phase == DecoderPhase::Eof
            && decoder.seek.is_none()
            && !self.should_end.load(Ordering::SeqCst)
        {
            self.decoder_cond.wait_for(&mut decoder, poll);
        }
    }

    // ========================================================================
    // Player status
    // ========================================================================

    pub fn play_status(&self) -> PlayStatus {
        PlayStatus::from_u8(self.play_status.load(Ordering::SeqCst))
    }

    pub fn set_play_status(&self, status: PlayStatus) {
        self.play_status.store(status as u8, Ordering::SeqCst);
    }

    /// Playing -> Paused. False if not currently playing.
    ///
    /// During a seek the request is recorded and applied when it completes.
    pub fn pause(&self) -> bool {
        let mut decoder = self.decoder.lock();
        if let Some(paused) = decoder.held_pause {
            decoder.held_pause = Some(true);
            return !paused;
        }
        self.play_status
            .compare_exchange(
                PlayStatus::Playing as u8,
                PlayStatus::Paused as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Paused -> Playing. False while a seek is in flight or if not paused.
    pub fn resume(&self) -> bool {
        let decoder = self.decoder.lock();
        if decoder.seek.is_some() {
            return false;
        }
        let resumed = self
            .play_status
            .compare_exchange(
                PlayStatus::Paused as u8,
                PlayStatus::Playing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        drop(decoder);
        resumed
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    pub fn should_end(&self) -> bool {
        self.should_end.load(Ordering::SeqCst)
    }

    /// Raise the end flag and wake every waiter
    pub fn request_end(&self) {
        self.should_end.store(true, Ordering::SeqCst);
        self.decoder_cond.notify_all();
        self.audio_waiting.wake();
        self.video_ready.wake();
        self.audio_ready.wake();
    }

    /// Wait on `flag` in `poll` steps until it equals `expected`, shutdown is
    /// requested, or `timeout` elapses.
    pub fn wait_flag(
        &self,
        flag: &Flag,
        expected: bool,
        timeout: Duration,
        poll: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if flag.wait_for(expected, poll) {
                return true;
            }
            if self.should_end() || Instant::now() >= deadline {
                return false;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn reading_state() -> PlaybackState {
        let state = PlaybackState::new();
        state.set_phase(DecoderPhase::Reading);
        state.set_play_status(PlayStatus::Playing);
        state
    }

    #[test]
    fn test_pause_is_idempotent() {
        let state = reading_state();
        assert!(state.pause());
        assert!(!state.pause());
        assert_eq!(state.play_status(), PlayStatus::Paused);
        assert!(state.resume());
        assert!(!state.resume());
        assert_eq!(state.play_status(), PlayStatus::Playing);
    }

    #[test]
    fn test_resume_refused_while_busy() {
        let state = reading_state();
        assert!(state.pause());
        assert!(state.request_seek(SeekKind::Advance));
        assert!(!state.resume());

        state.finish_seek();
        assert!(state.resume());
    }

    #[test]
    fn test_pause_during_seek_survives_it() {
        let state = reading_state();
        assert!(state.request_seek(SeekKind::Advance));
        state.hold_for_seek();
        assert_eq!(state.play_status(), PlayStatus::Paused);

        assert!(state.pause());
        assert!(!state.pause());
        state.finish_seek();
        assert_eq!(state.play_status(), PlayStatus::Paused);
        assert!(state.resume());
    }

    #[test]
    fn test_seek_restores_playing() {
        let state = reading_state();
        assert!(state.request_seek(SeekKind::Back));
        state.hold_for_seek();
        assert!(!state.resume());
        state.finish_seek();
        assert_eq!(state.play_status(), PlayStatus::Playing);

        // Paused beforehand: stays paused
        assert!(state.pause());
        assert!(state.request_seek(SeekKind::Back));
        state.hold_for_seek();
        assert!(!state.pause());
        state.finish_seek();
        assert_eq!(state.play_status(), PlayStatus::Paused);
    }

    #[test]
    fn test_seek_requests_are_gated() {
        let state = PlaybackState::new();
        // Nothing open yet
        assert!(!state.request_seek(SeekKind::Goto(0)));

        state.set_phase(DecoderPhase::Reading);
        assert!(state.request_seek(SeekKind::Back));
        assert_eq!(state.decoder_status(), DecoderStatus::Back);
        assert!(state.decoder_status().is_busy());
        assert!(!state.request_seek(SeekKind::Advance));

        state.finish_seek();
        assert_eq!(state.decoder_status(), DecoderStatus::Reading);

        state.set_phase(DecoderPhase::Eof);
        assert!(state.decoder_status().can_operate());
        assert!(state.request_seek(SeekKind::Goto(1_000_000)));
        assert_eq!(state.pending_seek(), Some(SeekKind::Goto(1_000_000)));
        assert_eq!(state.decoder_phase(), DecoderPhase::Eof);
    }

    #[test]
    fn test_eof_wait_released_by_seek() {
        let state = Arc::new(PlaybackState::new());
        state.set_phase(DecoderPhase::Eof);

        let waiter = {
            let state = state.clone();
            thread::spawn(move || state.wait_while_eof(Duration::from_millis(10)))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(state.request_seek(SeekKind::Goto(0)));
        waiter.join().unwrap();
    }

    #[test]
    fn test_flag_wait() {
        let flag = Arc::new(Flag::new(false));
        assert!(!flag.wait_for(true, Duration::from_millis(10)));

        let setter = {
            let flag = flag.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.set(true);
            })
        };
        assert!(flag.wait_for(true, Duration::from_secs(5)));
        setter.join().unwrap();
    }

    #[test]
    fn test_wait_flag_observes_shutdown() {
        let state = PlaybackState::new();
        let flag = Flag::new(false);
        state.request_end();
        let start = Instant::now();
        assert!(!state.wait_flag(&flag, true, Duration::from_secs(10), Duration::from_millis(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
