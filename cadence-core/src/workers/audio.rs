//! Audio output worker
//!
//! Feeds PCM buffers from the live slot into a device sink and advances
//! the master clock as the sink reports buffers played. Parks the sink
//! while paused or while the demux worker performs a seek.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::device::{AudioDeviceRegistry, AudioSink, PcmFormat};
use crate::session::Session;
use crate::state::{DecoderPhase, DecoderStatus, PlayStatus};

/// Marks the worker alive for seek handshakes, cleared on any exit path
struct RunningGuard(Arc<Session>);

impl RunningGuard {
    fn new(session: Arc<Session>) -> Self {
        session.state.audio_running.store(true, Ordering::SeqCst);
        Self(session)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.state.audio_running.store(false, Ordering::SeqCst);
        self.0.state.audio_waiting.wake();
    }
}

pub(crate) struct AudioWorker {
    session: Arc<Session>,
    registry: Arc<AudioDeviceRegistry>,
    /// Pts of every buffer currently queued on the sink, oldest first
    ring: VecDeque<i64>,
}

impl AudioWorker {
    pub fn new(session: Arc<Session>, registry: Arc<AudioDeviceRegistry>) -> Self {
        let capacity = session.config.audio_ring_buffers.max(1);
        Self {
            session,
            registry,
            ring: VecDeque::with_capacity(capacity),
        }
    }

    pub fn run(mut self) {
        let Some(stream) = self.session.info.audio.clone() else {
            tracing::info!("no audio stream, audio worker idle");
            self.session.state.audio_end.store(true, Ordering::SeqCst);
            return;
        };
        let _running = RunningGuard::new(self.session.clone());
        let state = &self.session.state;

        let lease = match self.registry.acquire() {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!("{}, stopping playback", e);
                state.request_end();
                return;
            }
        };
        let format = PcmFormat {
            sample_rate: stream.sample_rate,
        };
        let mut sink = match lease.device().open_sink(format) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(device = lease.device().name(), "{}, stopping playback", e);
                state.request_end();
                return;
            }
        };
        tracing::info!(
            device = lease.device().name(),
            opened = self.registry.open_count(),
            sample_rate = stream.sample_rate,
            "audio worker started"
        );

        self.startup(sink.as_mut());
        self.play_loop(sink.as_mut());

        sink.stop();
        drop(sink);
        drop(lease);
        tracing::info!("audio worker exiting");
    }

    fn startup(&mut self, sink: &mut dyn AudioSink) {
        let session = self.session.clone();
        let state = &session.state;
        let timeout = session.config.startup_timeout();
        let deadline = Instant::now() + timeout;
        let target = session.config.audio_ring_buffers.max(1);

        // First data, then a few buffers of lead before the clock starts
        loop {
            if session.should_end() {
                return;
            }
            if self.seek_started() {
                // The play loop parks for it and primes afterwards
                tracing::debug!("seek during audio startup");
                state.audio_ready.set(true);
                return;
            }
            let buffered = session.queues.audio_use().len();
            if buffered >= target || state.decoder_phase() == DecoderPhase::Eof {
                break;
            }
            if Instant::now() >= deadline {
                if buffered > 0 {
                    break;
                }
                tracing::error!("no audio decoded after {:?}, stopping playback", timeout);
                state.request_end();
                return;
            }
            if buffered == 0 {
                session.queues.audio_use().wait_for(session.poll());
            } else {
                thread::sleep(session.poll());
            }
        }
        self.refill(sink, target);
        self.publish_clock();

        state.audio_ready.set(true);
        if session.info.has_video()
            && !state.wait_flag(&state.video_ready, true, timeout, session.poll())
        {
            if !session.should_end() {
                tracing::error!("video not ready after {:?}, stopping playback", timeout);
                state.request_end();
            }
            return;
        }

        if state.play_status() == PlayStatus::Playing && !state.is_busy() {
            if let Err(e) = sink.play() {
                tracing::error!("{}, stopping playback", e);
                state.request_end();
            }
        }
    }

    fn seek_started(&self) -> bool {
        let state = &self.session.state;
        state.audio_should_flush.load(Ordering::SeqCst) || state.is_busy()
    }

    fn play_loop(&mut self, sink: &mut dyn AudioSink) {
        let session = self.session.clone();
        let state = &session.state;
        let target = session.config.audio_ring_buffers.max(1);

        while !session.should_end() {
            if state.audio_should_flush.swap(false, Ordering::SeqCst) {
                self.flush(sink);
            }

            if state.play_status() != PlayStatus::Playing || state.is_busy() {
                self.park(sink);
                continue;
            }

            let played = sink.processed();
            for _ in 0..played {
                self.ring.pop_front();
            }
            let queued = self.refill(sink, target);
            self.publish_clock();

            if self.ring.is_empty()
                && state.decoder_status() == DecoderStatus::Eof
                && session.queues.audio_use().is_empty()
                && !state.audio_end.load(Ordering::SeqCst)
            {
                state.audio_clock_live.store(false, Ordering::SeqCst);
                state.audio_end.store(true, Ordering::SeqCst);
                let pts_us = state.audio_pts.load(Ordering::SeqCst);
                tracing::debug!(pts_us, "audio pipeline drained");
            }

            if played == 0 && queued == 0 {
                thread::sleep(session.poll());
            }
        }
    }

    /// Move buffers from the live slot onto the sink until `target` are queued
    fn refill(&mut self, sink: &mut dyn AudioSink, target: usize) -> usize {
        let session = self.session.clone();
        let queues = &session.queues;
        let mut queued = 0;

        while self.ring.len() < target {
            // A flush is due; leave the live slot alone until it is done
            if session.state.audio_should_flush.load(Ordering::SeqCst) {
                break;
            }
            let snapshot = queues.snapshot();
            let Some(mut buffer) = queues.audio_frames.slot(snapshot.use_index).pop() else {
                break;
            };
            // Popped across a swap: the buffer belongs to the old position
            if !queues.is_current(snapshot) {
                break;
            }
            let pts_us = buffer.pts_us();
            let Some(pcm) = buffer.take() else {
                continue;
            };
            if let Err(e) = sink.queue(&pcm) {
                tracing::error!("{}, stopping playback", e);
                session.state.request_end();
                break;
            }
            self.ring.push_back(pts_us);
            queued += 1;
        }
        queued
    }

    /// The buffer at the head of the ring is the one being heard
    fn publish_clock(&self) {
        let state = &self.session.state;
        if let Some(&pts_us) = self.ring.front() {
            state.audio_pts.store(pts_us, Ordering::SeqCst);
            state.audio_clock_valid.store(true, Ordering::SeqCst);
        }
    }

    fn flush(&mut self, sink: &mut dyn AudioSink) {
        let queued = sink.queued();
        sink.stop();
        let dropped = self.ring.len();
        self.ring.clear();
        let stale = self.session.queues.audio_flush().clear();
        let state = &self.session.state;
        state.audio_end.store(false, Ordering::SeqCst);
        state.audio_clock_valid.store(false, Ordering::SeqCst);
        tracing::debug!(queued, dropped, stale, "audio flushed");
    }

    /// Hold the sink while paused or seeking, answering flushes as they come
    fn park(&mut self, sink: &mut dyn AudioSink) {
        let session = self.session.clone();
        let state = &session.state;

        sink.pause();
        state.audio_waiting.set(true);
        tracing::debug!("audio parked");

        loop {
            if session.should_end() {
                return;
            }
            if state.audio_should_flush.swap(false, Ordering::SeqCst) {
                self.flush(sink);
                state.audio_waiting.set(true);
            }
            if state.is_busy() {
                thread::sleep(session.poll());
                continue;
            }
            if state.play_status() == PlayStatus::Playing {
                break;
            }
            // Paused after a seek: queue the new position so the clock shows it
            if self.ring.is_empty() && !session.queues.audio_use().is_empty() {
                self.refill(sink, session.config.reprime_buffers.max(1));
                self.publish_clock();
            }
            thread::sleep(session.poll());
        }

        state.audio_waiting.set(false);
        if self.ring.is_empty() {
            self.reprime(sink);
        }
        if let Err(e) = sink.play() {
            tracing::error!("{}, stopping playback", e);
            state.request_end();
        }
        tracing::debug!(pts_us = state.audio_pts.load(Ordering::SeqCst), "audio resumed");
    }

    /// Queue a couple of buffers before restarting after a flush
    fn reprime(&mut self, sink: &mut dyn AudioSink) {
        let session = self.session.clone();
        let state = &session.state;
        let deadline = Instant::now() + session.config.startup_timeout();

        while session.queues.audio_use().is_empty() {
            if session.should_end()
                || state.audio_should_flush.load(Ordering::SeqCst)
                || state.play_status() != PlayStatus::Playing
                || state.decoder_status() == DecoderStatus::Eof
                || Instant::now() >= deadline
            {
                break;
            }
            thread::sleep(session.poll());
        }

        self.refill(sink, session.config.reprime_buffers.max(1));
        self.publish_clock();
    }
}
