//! User commands and key mapping
//!
//! Commands land in an unbounded queue that the video worker drains once
//! per command window; only the most recent command in a window is acted on.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    TogglePause,
    Back,
    Advance,
    Restart,
}

/// Keys the player understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Space,
    Left,
    Right,
    R,
    F2,
    Escape,
}

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Command(UserCommand),
    ToggleFullscreen,
    Stop,
}

impl Key {
    pub fn action(self) -> KeyAction {
        match self {
            Key::Space => KeyAction::Command(UserCommand::TogglePause),
            Key::Left => KeyAction::Command(UserCommand::Back),
            Key::Right => KeyAction::Command(UserCommand::Advance),
            Key::R => KeyAction::Command(UserCommand::Restart),
            Key::F2 => KeyAction::ToggleFullscreen,
            Key::Escape => KeyAction::Stop,
        }
    }

    /// Parse a key name as typed in a terminal shell
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | " " | "space" | "p" => Some(Key::Space),
            "left" | "h" | "b" => Some(Key::Left),
            "right" | "l" | "a" => Some(Key::Right),
            "r" | "restart" => Some(Key::R),
            "f2" | "f" => Some(Key::F2),
            "esc" | "escape" | "q" => Some(Key::Escape),
            _ => None,
        }
    }
}

pub(crate) struct CommandQueue {
    pending: Mutex<VecDeque<UserCommand>>,
    last_poll: Mutex<Instant>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            last_poll: Mutex::new(Instant::now()),
        }
    }

    pub fn push(&self, command: UserCommand) {
        self.pending.lock().push_back(command);
    }

    /// Take the newest command once `window` has passed since the last take.
    /// Everything older in the window is discarded.
    pub fn take_latest(&self, window: Duration) -> Option<UserCommand> {
        let mut last_poll = self.last_poll.lock();
        if last_poll.elapsed() < window {
            return None;
        }
        *last_poll = Instant::now();
        drop(last_poll);

        let mut pending = self.pending.lock();
        let latest = pending.pop_back();
        if !pending.is_empty() {
            tracing::debug!(dropped = pending.len(), ?latest, "coalesced user commands");
        }
        pending.clear();
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_command_wins() {
        let queue = CommandQueue::new();
        queue.push(UserCommand::Advance);
        queue.push(UserCommand::Back);
        queue.push(UserCommand::TogglePause);
        assert_eq!(queue.take_latest(Duration::ZERO), Some(UserCommand::TogglePause));
        assert_eq!(queue.take_latest(Duration::ZERO), None);
    }

    #[test]
    fn test_window_throttles() {
        let queue = CommandQueue::new();
        queue.push(UserCommand::Restart);
        assert_eq!(queue.take_latest(Duration::from_secs(60)), None);
        assert_eq!(queue.take_latest(Duration::ZERO), Some(UserCommand::Restart));
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(Key::Space.action(), KeyAction::Command(UserCommand::TogglePause));
        assert_eq!(Key::Left.action(), KeyAction::Command(UserCommand::Back));
        assert_eq!(Key::Right.action(), KeyAction::Command(UserCommand::Advance));
        assert_eq!(Key::R.action(), KeyAction::Command(UserCommand::Restart));
        assert_eq!(Key::F2.action(), KeyAction::ToggleFullscreen);
        assert_eq!(Key::Escape.action(), KeyAction::Stop);
        assert_eq!(Key::from_name("Right"), Some(Key::Right));
        assert_eq!(Key::from_name("esc"), Some(Key::Escape));
        assert_eq!(Key::from_name("zoom"), None);
    }
}
