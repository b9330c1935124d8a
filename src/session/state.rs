use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorKind;

/// Lifecycle of a conversation session
///
/// `Closed` and `Failed` are terminal; a new conversation needs a new
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Open => f.write_str("open"),
            SessionState::Closing => f.write_str("closing"),
            SessionState::Closed => f.write_str("closed"),
            SessionState::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}

/// What happened to a frame handed to `send_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Dropped because the microphone is muted
    Muted,
    /// Dropped because the session is not open
    NotOpen,
    /// Dropped because the outbound queue is full
    Dropped,
}

/// Events published to session observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A chunk of model speech was scheduled on the output clock
    AudioScheduled { sequence: u64, start: f64, duration: f64 },
    /// The model finished its turn
    TurnComplete,
    /// Queued playback was discarded because the user spoke
    Interrupted,
    Closed,
    Error { kind: ErrorKind },
}
