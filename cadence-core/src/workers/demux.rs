//! Demux/distribute worker
//!
//! Reads packets, decodes audio inline into the audio queue, hands video
//! packets to the video worker, and runs every seek.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::buffer::TimestampedBuffer;
use crate::pcm::PcmConverter;
use crate::session::{Session, SharedVideoDecoder};
use crate::source::{AudioDecoder, MediaSource, Packet, ReadError};
use crate::state::{DecoderPhase, SeekKind};

pub(crate) struct DemuxWorker {
    session: Arc<Session>,
    source: Box<dyn MediaSource>,
    audio_decoder: Option<Box<dyn AudioDecoder>>,
    converter: Option<PcmConverter>,
    video_decoder: Option<SharedVideoDecoder>,
    packet_cap: usize,
}

impl DemuxWorker {
    pub fn new(
        session: Arc<Session>,
        source: Box<dyn MediaSource>,
        audio_decoder: Option<Box<dyn AudioDecoder>>,
        converter: Option<PcmConverter>,
        video_decoder: Option<SharedVideoDecoder>,
    ) -> Self {
        let packet_cap = session.config.packet_cap(session.fps());
        Self {
            session,
            source,
            audio_decoder,
            converter,
            video_decoder,
            packet_cap,
        }
    }

    pub fn run(mut self) {
        tracing::info!(
            packet_cap = self.packet_cap,
            audio_decoder = self.audio_decoder.as_ref().map(|d| d.name()),
            output_rate = self.converter.as_ref().map(|c| c.sample_rate()),
            "demux worker started"
        );

        loop {
            if self.session.should_end() {
                break;
            }

            if let Some(kind) = self.session.state.pending_seek() {
                self.seek(kind);
                continue;
            }

            match self.source.read_packet() {
                Ok(packet) => self.dispatch(packet),
                Err(ReadError::EndOfStream) => self.at_eof(),
                Err(e) => {
                    tracing::warn!("{}, treating as end of stream", e);
                    self.at_eof();
                }
            }
        }

        self.session.state.set_phase(DecoderPhase::Stopped);
        tracing::info!("demux worker exiting");
    }

    // ========================================================================
    // Normal path
    // ========================================================================

    fn dispatch(&mut self, packet: Packet) {
        let info = &self.session.info;
        let video_index = info.video.as_ref().map(|v| v.index);
        let audio_index = info.audio.as_ref().map(|a| a.index);

        if Some(packet.stream_index) == video_index {
            self.push_video(packet);
        } else if Some(packet.stream_index) == audio_index {
            self.push_audio(packet);
        }
        // Unselected streams are dropped
    }

    fn push_video(&self, packet: Packet) {
        let queues = &self.session.queues;
        // Block (not drop) at the cap, unless a seek or stop takes over
        while queues.video_use().len() >= self.packet_cap {
            if self.session.should_end() || self.session.state.is_busy() {
                return;
            }
            thread::sleep(self.session.poll());
        }
        queues.video_use().push(packet);
    }

    fn push_audio(&mut self, packet: Packet) {
        let decoder = self.audio_decoder.as_mut();
        let (Some(decoder), Some(converter)) = (decoder, self.converter.as_ref()) else {
            return;
        };
        let Some(stream) = self.session.info.audio.as_ref() else {
            return;
        };

        let frames = match decoder.decode(&packet) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(pts = ?packet.pts, "audio decode failed, skipping packet: {}", e);
                return;
            }
        };

        let queues = &self.session.queues;
        let mut next_pts_us = packet.pts.map(|p| stream.time_base.ticks_to_us(p));
        for frame in frames {
            let pts_us = frame
                .pts
                .map(|p| stream.time_base.ticks_to_us(p))
                .or(next_pts_us)
                .unwrap_or(0);
            let pcm = converter.convert(&frame);
            next_pts_us = Some(pts_us + converter.duration_us(pcm.len()));

            while queues.audio_use().len() >= self.session.config.audio_queue_limit {
                if self.session.should_end() || self.session.state.is_busy() {
                    return;
                }
                thread::sleep(self.session.poll());
            }
            queues.audio_use().push(TimestampedBuffer::new(pcm, pts_us));
        }
    }

    // ========================================================================
    // EOF path
    // ========================================================================

    fn at_eof(&mut self) {
        let state = &self.session.state;
        state.set_phase(DecoderPhase::Eof);
        tracing::info!("end of stream reached, waiting for pipelines to drain");

        loop {
            if self.session.should_end() || state.is_busy() {
                return;
            }
            if state.video_end.load(Ordering::SeqCst) && state.audio_end.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(self.session.poll());
        }

        tracing::info!(pts_us = self.session.master_pts(), "end of playback");
        self.session.events.end_of_playback();

        // Stay here until a seek (or shutdown) moves us away from EOF
        state.wait_while_eof(self.session.poll());
        self.reset_end_flags();
    }

    fn reset_end_flags(&self) {
        let state = &self.session.state;
        if self.session.info.has_video() {
            state.video_end.store(false, Ordering::SeqCst);
        }
        if self.session.info.has_audio() {
            state.audio_end.store(false, Ordering::SeqCst);
        }
    }

    // ========================================================================
    // Seek path
    // ========================================================================

    fn seek(&mut self, kind: SeekKind) {
        let session = self.session.clone();
        let state = &session.state;
        let info = &session.info;

        state.hold_for_seek();

        // Taking the lock waits out any decode or present in progress; the
        // video worker never sees the epoch move while it holds it
        let video_decoder = self.video_decoder.clone();
        let mut decoding = video_decoder.as_ref().map(|d| d.lock());
        let snapshot = session.queues.swap_use_flush();
        if let Some(decoder) = decoding.as_mut() {
            decoder.flush();
        }
        drop(decoding);
        state.audio_waiting.set(false);
        self.reset_end_flags();
        state.video_should_flush.store(true, Ordering::SeqCst);
        state.audio_should_flush.store(true, Ordering::SeqCst);

        let master = session.master_pts();
        let offset = session.seek_offset_us();
        let mut target = match kind {
            SeekKind::Advance => master + offset,
            SeekKind::Back => master - offset,
            SeekKind::Goto(target) => target,
        };
        if info.duration_us > 0 {
            target = target.min(info.duration_us);
        }
        target = target.max(0);

        tracing::info!(?kind, master, target, epoch = snapshot.epoch, "seeking");

        // The clocks keep their old value until the new segment reports in
        if info.has_audio() {
            state.audio_clock_valid.store(false, Ordering::SeqCst);
            state.audio_clock_live.store(true, Ordering::SeqCst);
        }

        if let Some(decoder) = self.audio_decoder.as_mut() {
            decoder.flush();
        }

        if let Err(e) = self.source.seek(target) {
            tracing::warn!("{}, continuing from current position", e);
        }

        if info.has_audio() {
            let deadline = Instant::now() + session.config.startup_timeout();
            while !state.audio_waiting.wait_for(true, session.poll()) {
                if session.should_end() || !state.audio_running.load(Ordering::SeqCst) {
                    break;
                }
                if Instant::now() >= deadline {
                    tracing::warn!("audio worker did not park for the seek, continuing");
                    break;
                }
            }
        }

        state.finish_seek();
        tracing::debug!(target, status = ?state.play_status(), "seek complete");
    }
}
