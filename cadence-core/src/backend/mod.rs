//! Media backends
//!
//! - `symphonia_audio`: real audio files through symphonia
//! - `pattern`: generated video + audio for tests and demos

pub mod pattern;
pub mod symphonia_audio;

pub use pattern::{PatternBackend, PatternSpec};
pub use symphonia_audio::SymphoniaBackend;
