use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::SessionState;

/// Statistics about a conversation session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Unique session identifier
    pub session_id: String,

    #[serde(flatten)]
    pub state: SessionState,

    pub muted: bool,

    /// When the session opened, if it did
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since the session opened
    pub elapsed_secs: f64,

    /// Frames handed to the transport
    pub frames_sent: u64,

    /// Frames discarded while muted
    pub frames_muted: u64,

    /// Frames discarded because the outbound queue was full
    pub frames_congested: u64,

    /// Chunks of model speech scheduled for playback
    pub chunks_scheduled: u64,

    /// Inbound chunks skipped because they failed to decode
    pub decode_errors: u64,

    /// Remote interruptions handled
    pub interruptions: u64,

    /// Output nodes scheduled but not yet finished
    pub active_nodes: usize,
}
