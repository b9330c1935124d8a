use super::state::AppState;
use crate::error::PipelineError;
use crate::session::{PersonaConfig, SessionState, SessionStats};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Serialize)]
pub struct SpectrumResponse {
    pub path: &'static str,
    /// One byte per frequency bin, 0 (quiet) to 255 (loud)
    pub bins: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Busy | PipelineError::InvalidState(_) | PipelineError::Cancelled => StatusCode::CONFLICT,
        PipelineError::Auth(_) => StatusCode::UNAUTHORIZED,
        PipelineError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Network(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Decode(_) | PipelineError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /conversation/connect
/// Start a new conversation
pub async fn connect(State(state): State<AppState>, Json(persona): Json<PersonaConfig>) -> impl IntoResponse {
    info!(
        "Connect requested (voice {}, {} / {})",
        persona.voice, persona.country, persona.dialect
    );

    match state.controller.start(&persona).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ConnectResponse {
                session_id: session.id().to_string(),
                state: session.state(),
                message: format!("Conversation started with voice {}", persona.voice),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start conversation: {}", e);
            error_response(status_for(&e), e)
        }
    }
}

/// POST /conversation/disconnect
/// End the current conversation
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.stop().await {
        Some(stats) => {
            info!("Conversation {} ended", stats.session_id);
            (
                StatusCode::OK,
                Json(DisconnectResponse {
                    message: "Conversation ended".to_string(),
                    stats,
                }),
            )
                .into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, "No conversation to end"),
    }
}

/// POST /conversation/mute
/// Mute or unmute the microphone
pub async fn set_muted(State(state): State<AppState>, Json(req): Json<MuteRequest>) -> impl IntoResponse {
    match state.controller.set_muted(req.muted) {
        Ok(()) => (StatusCode::OK, Json(MuteRequest { muted: req.muted })).into_response(),
        Err(e) => error_response(status_for(&e), e),
    }
}

/// GET /conversation/status
/// Get state and statistics of the current conversation
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.status()))
}

/// GET /conversation/spectrum/input
pub async fn input_spectrum(State(state): State<AppState>) -> impl IntoResponse {
    Json(SpectrumResponse {
        path: "input",
        bins: state.controller.input_spectrum(),
    })
}

/// GET /conversation/spectrum/output
pub async fn output_spectrum(State(state): State<AppState>) -> impl IntoResponse {
    Json(SpectrumResponse {
        path: "output",
        bins: state.controller.output_spectrum(),
    })
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
