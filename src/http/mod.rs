//! HTTP API for driving a conversation from a UI
//!
//! - POST /conversation/connect - Start a conversation with a persona
//! - POST /conversation/disconnect - End the conversation
//! - POST /conversation/mute - Mute or unmute the microphone
//! - GET /conversation/status - Session state and statistics
//! - GET /conversation/spectrum/input - Microphone spectrum bytes
//! - GET /conversation/spectrum/output - Playback spectrum bytes
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
