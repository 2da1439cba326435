//! Player configuration
//!
//! Every knob has a default, so a JSON config only needs the fields it
//! changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Relative seek distance for advance/back
    pub seek_offset_ms: u64,
    /// Decoded video frames kept ahead of presentation
    pub frame_lookahead: usize,
    /// Audio buffers kept in flight on the device
    pub audio_ring_buffers: usize,
    /// Buffers queued before restarting audio after a flush
    pub reprime_buffers: usize,
    /// Packet cap = average frame rate * this factor
    pub backpressure_factor: usize,
    /// Decoded audio chunks the demux worker may run ahead
    pub audio_queue_limit: usize,
    /// How long workers wait for first data at startup
    pub startup_timeout_ms: u64,
    /// User commands are coalesced over this window (last one wins)
    pub command_window_ms: u64,
    /// Backoff sleep / wake period for waits that must observe shutdown
    pub poll_interval_ms: u64,
    /// Frame rate assumed when a stream does not declare one
    pub fallback_fps: u32,
    /// Capacity of each event channel
    pub event_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            seek_offset_ms: 5_000,
            frame_lookahead: 5,
            audio_ring_buffers: 8,
            reprime_buffers: 2,
            backpressure_factor: 4,
            audio_queue_limit: 512,
            startup_timeout_ms: 10_000,
            command_window_ms: 100,
            poll_interval_ms: 10,
            fallback_fps: 30,
            event_capacity: 16,
        }
    }
}

impl PlayerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn seek_offset(&self) -> Duration {
        Duration::from_millis(self.seek_offset_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn command_window(&self) -> Duration {
        Duration::from_millis(self.command_window_ms)
    }

    /// Never longer than 10ms
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, 10))
    }

    /// Upper bound on queued video packets for a stream at `fps`
    pub fn packet_cap(&self, fps: f64) -> usize {
        let fps = if fps > 0.0 { fps } else { self.fallback_fps as f64 };
        ((fps.round() as usize) * self.backpressure_factor).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.seek_offset(), Duration::from_secs(5));
        assert_eq!(config.frame_lookahead, 5);
        assert_eq!(config.audio_ring_buffers, 8);
        assert_eq!(config.reprime_buffers, 2);
        assert_eq!(config.packet_cap(30.0), 120);
        assert_eq!(config.packet_cap(0.0), 120);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{ "seek_offset_ms": 1000, "poll_interval_ms": 50 }"#;
        let config = PlayerConfig::from_json(json).unwrap();
        assert_eq!(config.seek_offset_ms, 1000);
        assert_eq!(config.frame_lookahead, 5);
        // Clamped so shutdown is always observed quickly
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.json");
        std::fs::write(&path, r#"{ "frame_lookahead": 3 }"#).unwrap();
        let config = PlayerConfig::load(&path).unwrap();
        assert_eq!(config.frame_lookahead, 3);

        assert!(matches!(
            PlayerConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PlayerConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
