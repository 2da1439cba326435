//! # Player
//!
//! The control surface a shell drives: `open` a file, `start` the three
//! workers, poll the clock and the event channels, issue control calls,
//! `stop`. Every call returns immediately except `stop`/`join`, which
//! wait for the workers to exit.
//!
//! ```no_run
//! use cadence_core::{Player, PlayerConfig};
//!
//! let mut player = Player::new(PlayerConfig::default());
//! if player.open("song.flac") && player.start() {
//!     let events = player.events();
//!     let _ = events.end_of_playback.recv();
//! }
//! player.stop();
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::SymphoniaBackend;
use crate::command::{Key, KeyAction, UserCommand};
use crate::config::PlayerConfig;
use crate::device::AudioDeviceRegistry;
use crate::events::{self, EventSender, PlayerEvents};
use crate::pcm::PcmConverter;
use crate::scale::SoftwareScaler;
use crate::session::{Session, SharedVideoDecoder};
use crate::sink::{LatestFrameSink, VideoSink};
use crate::source::{MediaBackend, MediaInfo, OpenError, OpenedMedia};
use crate::state::{DecoderPhase, DecoderStatus, PlayStatus, SeekKind};
use crate::workers::{AudioWorker, DemuxWorker, VideoWorker};

/// Opened but not yet started
struct Prepared {
    media: OpenedMedia,
    converter: Option<PcmConverter>,
}

/// Ends the session if a worker thread unwinds, so the others do not
/// wait forever on it
struct EndOnPanic(Arc<Session>);

impl Drop for EndOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("worker panicked, ending session");
            self.0.state.request_end();
        }
    }
}

pub struct Player {
    config: PlayerConfig,
    backend: Arc<dyn MediaBackend>,
    registry: Arc<AudioDeviceRegistry>,
    video_sink: Arc<dyn VideoSink>,
    event_tx: EventSender,
    events: PlayerEvents,
    seek_offset: Duration,
    fullscreen: AtomicBool,
    session: Option<Arc<Session>>,
    prepared: Option<Prepared>,
    workers: Vec<JoinHandle<()>>,
}

impl Player {
    /// Player over the symphonia backend, the wall-clock audio device and
    /// a [`LatestFrameSink`]
    pub fn new(config: PlayerConfig) -> Self {
        let (event_tx, events) = events::channel(config.event_capacity);
        let seek_offset = config.seek_offset();
        Self {
            config,
            backend: Arc::new(SymphoniaBackend::new()),
            registry: AudioDeviceRegistry::clocked(),
            video_sink: Arc::new(LatestFrameSink::new()),
            event_tx,
            events,
            seek_offset,
            fullscreen: AtomicBool::new(false),
            session: None,
            prepared: None,
            workers: Vec::new(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_audio_registry(mut self, registry: Arc<AudioDeviceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_video_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.video_sink = sink;
        self
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    // ========================================================================
    // Open / Start / Stop
    // ========================================================================

    /// Open `path` and prepare a session. Stops anything already playing.
    pub fn try_open(&mut self, path: impl AsRef<Path>) -> Result<MediaInfo, OpenError> {
        let path = path.as_ref();
        if self.session.is_some() {
            self.stop();
        }
        self.session = None;
        self.prepared = None;
        self.events.drain();

        let media = self.backend.open(path)?;
        let info = media.info()?;
        let converter = info
            .audio
            .as_ref()
            .map(|a| PcmConverter::new(a.sample_rate, a.channels))
            .transpose()?;

        tracing::info!(
            path = %path.display(),
            backend = self.backend.name(),
            video = info.has_video(),
            cover = info.is_cover(),
            audio = info.has_audio(),
            duration_us = info.duration_us,
            "opened media"
        );

        let session = Session::new(
            info.clone(),
            self.config.clone(),
            self.event_tx.clone(),
            self.seek_offset,
        );
        self.session = Some(Arc::new(session));
        self.prepared = Some(Prepared { media, converter });
        Ok(info)
    }

    pub fn open(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.try_open(path) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(path = %path.display(), "open failed: {}", e);
                false
            }
        }
    }

    /// Spawn the demux, video and audio workers for the opened media
    pub fn start(&mut self) -> bool {
        let Some(session) = self.session.clone() else {
            tracing::warn!("start called with nothing open");
            return false;
        };
        let Some(prepared) = self.prepared.take() else {
            tracing::warn!("session already started");
            return false;
        };
        let Prepared { media, converter } = prepared;

        let video_decoder: Option<SharedVideoDecoder> =
            media.video_decoder.map(|d| Arc::new(Mutex::new(d)));

        let demux = DemuxWorker::new(
            session.clone(),
            media.source,
            media.audio_decoder,
            converter,
            video_decoder.clone(),
        );
        let video = VideoWorker::new(
            session.clone(),
            video_decoder,
            Box::new(SoftwareScaler::new()),
            self.video_sink.clone(),
        );
        let audio = AudioWorker::new(session.clone(), self.registry.clone());

        session.state.set_phase(DecoderPhase::Reading);
        session.state.set_play_status(PlayStatus::Playing);

        let spawned = self.spawn_worker("cadence-demux", &session, move || demux.run())
            && self.spawn_worker("cadence-video", &session, move || video.run())
            && self.spawn_worker("cadence-audio", &session, move || audio.run());

        if !spawned {
            session.state.request_end();
            self.join();
            return false;
        }

        tracing::info!("playback started");
        true
    }

    fn spawn_worker<F>(&mut self, name: &str, session: &Arc<Session>, run: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = EndOnPanic(session.clone());
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _guard = guard;
            run();
        });

        match spawned {
            Ok(handle) => {
                self.workers.push(handle);
                true
            }
            Err(e) => {
                tracing::error!(worker = name, "failed to spawn worker: {}", e);
                false
            }
        }
    }

    /// Signal every worker to end and wait for them
    pub fn stop(&mut self) {
        self.prepared = None;
        if let Some(session) = &self.session {
            session.state.request_end();
            session.queues.notify_all();
        }
        self.join();
    }

    /// Wait for the workers to exit on their own (device failure, `Escape`,
    /// another thread calling `stop`), then tear the session down.
    pub fn join(&mut self) {
        let was_running = !self.workers.is_empty();
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "worker exited by panic");
            }
        }

        if let Some(session) = &self.session {
            session.state.set_phase(DecoderPhase::Stopped);
            session.state.set_play_status(PlayStatus::Stopped);
            session.queues.clear_all();
        }
        if was_running {
            tracing::info!("playback stopped");
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    pub fn pause(&self) -> bool {
        self.session.as_ref().map(|s| s.state.pause()).unwrap_or(false)
    }

    /// Refused while a seek is in flight
    pub fn resume(&self) -> bool {
        self.session.as_ref().map(|s| s.state.resume()).unwrap_or(false)
    }

    pub fn advance(&self) {
        self.send_command(UserCommand::Advance);
    }

    pub fn back(&self) {
        self.send_command(UserCommand::Back);
    }

    /// Absolute seek. Lands on the nearest earlier keyframe.
    pub fn set_current_pts(&self, target: Duration) -> bool {
        self.request_seek(SeekKind::Goto(target.as_micros() as i64))
    }

    pub fn restart(&self) -> bool {
        self.request_seek(SeekKind::Goto(0))
    }

    fn request_seek(&self, kind: SeekKind) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let accepted = session.state.request_seek(kind);
        if !accepted {
            tracing::debug!(?kind, status = ?session.state.decoder_status(), "seek refused");
        }
        accepted
    }

    /// Queue a command for the video worker (last one per window wins)
    pub fn send_command(&self, command: UserCommand) {
        if let Some(session) = &self.session {
            session.commands.push(command);
        }
    }

    pub fn handle_key(&mut self, key: Key) {
        match key.action() {
            KeyAction::Command(command) => self.send_command(command),
            KeyAction::ToggleFullscreen => {
                self.toggle_fullscreen();
            }
            KeyAction::Stop => self.stop(),
        }
    }

    /// Flip fullscreen and tell the shell. Returns the new state.
    pub fn toggle_fullscreen(&self) -> bool {
        let on = !self.fullscreen.fetch_xor(true, Ordering::SeqCst);
        self.event_tx.fullscreen(on);
        on
    }

    pub fn set_offset(&mut self, offset: Duration) {
        self.seek_offset = offset;
        if let Some(session) = &self.session {
            session
                .seek_offset_us
                .store(offset.as_micros() as i64, Ordering::SeqCst);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn events(&self) -> PlayerEvents {
        self.events.clone()
    }

    pub fn is_running(&self) -> bool {
        self.workers.iter().any(|h| !h.is_finished())
    }

    /// True while `Reading` or at `Eof`, i.e. a seek would be accepted
    pub fn can_operate(&self) -> bool {
        self.decoder_status().can_operate()
    }

    pub fn play_status(&self) -> PlayStatus {
        self.session
            .as_ref()
            .map(|s| s.state.play_status())
            .unwrap_or(PlayStatus::Unknown)
    }

    pub fn decoder_status(&self) -> DecoderStatus {
        self.session
            .as_ref()
            .map(|s| s.state.decoder_status())
            .unwrap_or(DecoderStatus::Unknown)
    }

    pub fn current_pts(&self) -> Duration {
        self.session
            .as_ref()
            .map(|s| Duration::from_micros(s.master_pts().max(0) as u64))
            .unwrap_or(Duration::ZERO)
    }

    pub fn duration(&self) -> Duration {
        self.session
            .as_ref()
            .map(|s| Duration::from_micros(s.info.duration_us.max(0) as u64))
            .unwrap_or(Duration::ZERO)
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
