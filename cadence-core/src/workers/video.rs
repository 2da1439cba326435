//! Video decode & delivery worker
//!
//! Decodes packets from the live slot into a short look-ahead of RGB
//! frames and presents each one once the master clock reaches it. Also
//! turns queued user commands into status transitions.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::command::UserCommand;
use crate::queue::SlotSnapshot;
use crate::scale::Scaler;
use crate::session::{Session, SharedVideoDecoder};
use crate::sink::{VideoFrame, VideoSink};
use crate::source::RawVideoFrame;
use crate::state::{DecoderStatus, PlayStatus, SeekKind};

/// Drain calls allowed per segment for codecs (and covers) that hold frames back
const MAX_DRAIN_ATTEMPTS: u32 = 10;
/// Subtracted from the frame interval to absorb loop overhead
const PACING_SLACK_MS: f64 = 3.0;

struct PendingFrame {
    frame: VideoFrame,
    epoch: u64,
}

pub(crate) struct VideoWorker {
    session: Arc<Session>,
    decoder: Option<SharedVideoDecoder>,
    scaler: Box<dyn Scaler>,
    sink: Arc<dyn VideoSink>,
    lookahead: VecDeque<PendingFrame>,
    drain_attempts: u32,
    drained_at_eof: bool,
}

impl VideoWorker {
    pub fn new(
        session: Arc<Session>,
        decoder: Option<SharedVideoDecoder>,
        scaler: Box<dyn Scaler>,
        sink: Arc<dyn VideoSink>,
    ) -> Self {
        let depth = session.config.frame_lookahead.max(1);
        Self {
            session,
            decoder,
            scaler,
            sink,
            lookahead: VecDeque::with_capacity(depth),
            drain_attempts: 0,
            drained_at_eof: false,
        }
    }

    pub fn run(mut self) {
        let codec = self.decoder.as_ref().map(|d| d.lock().name().to_string());
        tracing::info!(
            video = ?codec,
            cover = self.session.info.is_cover(),
            "video worker started"
        );

        if self.decoder.is_none() {
            // Audio-only: still the owner of user commands
            while !self.session.should_end() {
                self.handle_commands();
                thread::sleep(self.session.poll());
            }
            tracing::info!("video worker exiting");
            return;
        }

        self.startup();

        let depth = self.session.config.frame_lookahead.max(1);
        while !self.session.should_end() {
            self.handle_commands();

            if self.session.state.video_should_flush.swap(false, Ordering::SeqCst) {
                self.flush();
            }

            while self.lookahead.len() < depth {
                if !self.decode_next() {
                    break;
                }
            }

            let state = &self.session.state;
            let delivered = state.play_status() == PlayStatus::Playing
                && !state.is_busy()
                && self.deliver();

            self.check_end();

            if !delivered {
                thread::sleep(self.session.poll());
            }
        }

        tracing::info!("video worker exiting");
    }

    fn startup(&mut self) {
        let session = self.session.clone();
        let state = &session.state;
        let timeout = session.config.startup_timeout();
        let deadline = Instant::now() + timeout;

        while self.lookahead.is_empty() && !session.should_end() && Instant::now() < deadline {
            if state.video_should_flush.swap(false, Ordering::SeqCst) {
                self.flush();
            }
            if !self.decode_next() {
                let exhausted = state.decoder_status() == DecoderStatus::Eof
                    && session.queues.video_use().is_empty();
                if exhausted {
                    break;
                }
                thread::sleep(session.poll());
            }
        }

        if session.should_end() {
            return;
        }
        let exhausted = state.decoder_status() == DecoderStatus::Eof;
        if self.lookahead.is_empty() && !exhausted && !state.is_busy() {
            tracing::error!("no video frame decoded after {:?}, stopping playback", timeout);
            state.request_end();
            return;
        }
        state.video_ready.set(true);

        if session.info.has_audio()
            && !state.wait_flag(&state.audio_ready, true, timeout, session.poll())
            && !session.should_end()
        {
            tracing::error!("audio not ready after {:?}, stopping playback", timeout);
            state.request_end();
        }
    }

    // ========================================================================
    // Decode
    // ========================================================================

    /// Decode one packet from the live slot. False when there was nothing to do.
    fn decode_next(&mut self) -> bool {
        let Some(decoder) = self.decoder.clone() else {
            return false;
        };
        let queues = &self.session.queues;
        let snapshot = queues.snapshot();

        let Some(packet) = queues.video_packets.slot(snapshot.use_index).pop() else {
            if self.session.info.is_cover() && self.drain_attempts < MAX_DRAIN_ATTEMPTS {
                self.drain_attempts += 1;
                let drained = decoder.lock().drain();
                return match drained {
                    Ok(frames) if !frames.is_empty() => {
                        self.accept(frames, snapshot);
                        true
                    }
                    Ok(_) => false,
                    Err(e) => {
                        tracing::warn!("video drain failed: {}", e);
                        false
                    }
                };
            }
            return false;
        };

        let result = decoder.lock().decode(&packet);
        match result {
            Ok(frames) => self.accept(frames, snapshot),
            Err(e) => {
                tracing::warn!(pts = ?packet.pts, "video decode failed, skipping packet: {}", e)
            }
        }
        true
    }

    fn accept(&mut self, frames: Vec<RawVideoFrame>, snapshot: SlotSnapshot) {
        let Some(stream) = self.session.info.video.as_ref() else {
            return;
        };
        let frame_us = (1_000_000.0 / self.session.fps()) as i64;

        for raw in frames {
            let pts_us = match raw.pts {
                Some(pts) => stream.time_base.ticks_to_us(pts),
                None => self
                    .lookahead
                    .back()
                    .map(|f| f.frame.pts_us + frame_us)
                    .unwrap_or_else(|| self.session.state.video_pts.load(Ordering::SeqCst)),
            };

            match self.scaler.to_rgb24(&raw, stream.width, stream.height) {
                Ok(rgb) => self.lookahead.push_back(PendingFrame {
                    frame: VideoFrame {
                        rgb,
                        width: stream.width,
                        height: stream.height,
                        pts_us,
                    },
                    epoch: snapshot.epoch,
                }),
                Err(e) => tracing::warn!(pts_us, "color conversion failed, dropping frame: {}", e),
            }
        }
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Present the head frame if the clock has reached it
    fn deliver(&mut self) -> bool {
        let session = self.session.clone();
        let state = &session.state;

        // Anything decoded before the last swap is never shown
        let snapshot = session.queues.snapshot();
        while self.lookahead.front().is_some_and(|f| f.epoch != snapshot.epoch) {
            self.lookahead.pop_front();
        }

        let audio_gated = session.info.has_audio() && state.audio_clock_live.load(Ordering::SeqCst);
        let sync_pts = if !audio_gated {
            i64::MAX
        } else if state.audio_clock_valid.load(Ordering::SeqCst) {
            state.audio_pts.load(Ordering::SeqCst)
        } else {
            // Audio has not re-primed since the last seek
            return false;
        };

        match self.lookahead.front() {
            Some(head) if head.frame.pts_us <= sync_pts => {}
            _ => return false,
        }
        let Some(pending) = self.lookahead.pop_front() else {
            return false;
        };

        // Seeks swap slots under the decoder lock, so the epoch holds still
        // until the frame is handed over
        let decoder = self.decoder.clone();
        let swap_guard = decoder.as_ref().map(|d| d.lock());
        if !session.queues.is_current(snapshot) {
            return false;
        }
        let pts_us = pending.frame.pts_us;
        self.sink.present(pending.frame);
        state.video_pts.store(pts_us, Ordering::SeqCst);
        drop(swap_guard);

        session.events.frame_ready(pts_us);

        if !audio_gated {
            self.pace();
        }
        true
    }

    /// Free-running clock: hold each frame for one frame interval
    fn pace(&self) {
        let ms = 1000.0 / self.session.fps() - PACING_SLACK_MS;
        if ms > 0.0 {
            thread::sleep(Duration::from_secs_f64(ms / 1000.0));
        }
    }

    fn check_end(&mut self) {
        let session = self.session.clone();
        let state = &session.state;
        if state.decoder_status() != DecoderStatus::Eof || state.video_end.load(Ordering::SeqCst) {
            return;
        }
        if !self.lookahead.is_empty() || !session.queues.video_use().is_empty() {
            return;
        }

        if !self.drained_at_eof {
            self.drained_at_eof = true;
            if let Some(decoder) = self.decoder.clone() {
                let snapshot = session.queues.snapshot();
                let drained = decoder.lock().drain();
                match drained {
                    Ok(frames) if !frames.is_empty() => {
                        self.accept(frames, snapshot);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("video drain at EOF failed: {}", e),
                }
            }
        }

        state.video_end.store(true, Ordering::SeqCst);
        tracing::debug!("video pipeline drained");
    }

    fn flush(&mut self) {
        let dropped = self.lookahead.len();
        self.lookahead.clear();
        let stale = self.session.queues.video_flush().clear();
        self.drain_attempts = 0;
        self.drained_at_eof = false;
        self.session.state.video_end.store(false, Ordering::SeqCst);
        tracing::debug!(dropped, stale, "video flushed");
    }

    // ========================================================================
    // User commands
    // ========================================================================

    fn handle_commands(&self) {
        let session = &self.session;
        let Some(command) = session.commands.take_latest(session.config.command_window()) else {
            return;
        };
        let state = &session.state;

        let accepted = match command {
            UserCommand::TogglePause => match state.play_status() {
                PlayStatus::Playing => state.pause(),
                PlayStatus::Paused => state.resume(),
                _ => false,
            },
            UserCommand::Back => state.request_seek(SeekKind::Back),
            UserCommand::Advance => state.request_seek(SeekKind::Advance),
            UserCommand::Restart => state.request_seek(SeekKind::Goto(0)),
        };

        if accepted {
            tracing::debug!(?command, "user command applied");
        } else {
            tracing::debug!(?command, status = ?state.decoder_status(), "user command refused");
        }
    }
}
