//! Conversation session management
//!
//! This module provides the `ConversationSession` abstraction that manages:
//! - Microphone capture and framing into 16kHz PCM
//! - Streaming frames to the remote model and receiving its speech
//! - Gapless playback scheduling and interruption
//! - Session state, events and statistics
//!
//! `ConversationController` owns the active session for the service.

mod config;
mod controller;
mod session;
mod state;
mod stats;

pub use config::{Gender, PersonaConfig, SessionConfig, VoiceName};
pub use controller::{ConversationController, ConversationStatus, SessionFactory};
pub use session::{ConversationSession, SessionParts};
pub use state::{SendOutcome, SessionEvent, SessionState};
pub use stats::SessionStats;
