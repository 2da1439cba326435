//! # Cadence Core
//!
//! Playback core for a media player: a demux worker, a video decode and
//! delivery worker and an audio output worker, coordinated through a
//! double-buffered queue set and a small playback state machine so that
//! seeks and pauses never stall or corrupt in-flight data.

// ============================================================================
// Control Surface
// ============================================================================
pub mod config;
pub mod command;
pub mod events;
pub mod player;

// ============================================================================
// Pipeline Plumbing
// ============================================================================
pub mod buffer;
pub mod queue;
pub mod state;
pub(crate) mod session;
pub(crate) mod workers;

// ============================================================================
// Media Backends
// ============================================================================
pub mod source;
pub mod backend;
pub mod pcm;
pub mod scale;

// ============================================================================
// Output
// ============================================================================
pub mod device;
pub mod sink;
#[cfg(feature = "audio")]
pub mod cpal_device;

pub use command::{Key, KeyAction, UserCommand};
pub use config::{ConfigError, PlayerConfig};
pub use device::{AudioDeviceRegistry, DeviceError, DeviceLease};
pub use events::PlayerEvents;
pub use player::Player;
pub use sink::{LatestFrameSink, VideoFrame, VideoSink};
pub use source::{MediaBackend, MediaInfo, OpenError};
pub use state::{DecoderStatus, PlayStatus};
