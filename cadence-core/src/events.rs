//! Events from the player to its shell
//!
//! One bounded channel per event kind. The shell polls the receivers from
//! its own loop; workers never block on a slow shell.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Receiving side, cloneable so several shell components can listen
#[derive(Clone)]
pub struct PlayerEvents {
    /// A frame was presented to the video sink; refresh. Carries its pts.
    pub frame_ready: Receiver<Duration>,
    /// Both streams drained after EOF. Sent once per EOF.
    pub end_of_playback: Receiver<()>,
    /// Fullscreen was toggled; carries the new state
    pub fullscreen: Receiver<bool>,
}

#[derive(Clone)]
pub(crate) struct EventSender {
    frame_ready: Sender<Duration>,
    end_of_playback: Sender<()>,
    fullscreen: Sender<bool>,
}

pub(crate) fn channel(capacity: usize) -> (EventSender, PlayerEvents) {
    let capacity = capacity.max(1);
    let (frame_tx, frame_rx) = bounded(capacity);
    let (end_tx, end_rx) = bounded(capacity);
    let (full_tx, full_rx) = bounded(capacity);
    (
        EventSender {
            frame_ready: frame_tx,
            end_of_playback: end_tx,
            fullscreen: full_tx,
        },
        PlayerEvents {
            frame_ready: frame_rx,
            end_of_playback: end_rx,
            fullscreen: full_rx,
        },
    )
}

impl EventSender {
    /// A full channel already holds a pending refresh, so extra ones are dropped.
    pub fn frame_ready(&self, pts_us: i64) {
        let pts = Duration::from_micros(pts_us.max(0) as u64);
        let _ = self.frame_ready.try_send(pts);
    }

    pub fn end_of_playback(&self) {
        if let Err(TrySendError::Full(_)) = self.end_of_playback.try_send(()) {
            tracing::warn!("end-of-playback channel full, shell is not polling");
        }
    }

    pub fn fullscreen(&self, on: bool) {
        if let Err(TrySendError::Full(_)) = self.fullscreen.try_send(on) {
            tracing::warn!("fullscreen channel full, request dropped");
        }
    }
}

impl PlayerEvents {
    /// Discard everything pending (used when a new file is opened)
    pub fn drain(&self) {
        while self.frame_ready.try_recv().is_ok() {}
        while self.end_of_playback.try_recv().is_ok() {}
        while self.fullscreen.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ready_never_blocks() {
        let (tx, rx) = channel(2);
        for i in 0..10 {
            tx.frame_ready(i * 1000);
        }
        assert_eq!(rx.frame_ready.try_recv().unwrap(), Duration::from_millis(0));
        assert_eq!(rx.frame_ready.try_recv().unwrap(), Duration::from_millis(1));
        assert!(rx.frame_ready.try_recv().is_err());
    }

    #[test]
    fn test_drain() {
        let (tx, rx) = channel(4);
        tx.end_of_playback();
        tx.fullscreen(true);
        rx.drain();
        assert!(rx.end_of_playback.try_recv().is_err());
        assert!(rx.fullscreen.try_recv().is_err());
    }
}
