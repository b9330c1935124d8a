use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure categories surfaced by the conversation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Microphone or speaker unavailable/denied
    Device,
    /// Missing or rejected credential
    Auth,
    /// Handshake or transport failure
    Network,
    /// One inbound chunk could not be decoded
    Decode,
    /// Remote sent a message we do not understand
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Device => "device",
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Decode => "decode",
            ErrorKind::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Errors produced by the capture, streaming and playback pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("a conversation is already active")]
    Busy,

    #[error("session is {0}")]
    InvalidState(String),

    #[error("connect cancelled by disconnect")]
    Cancelled,
}

impl PipelineError {
    /// Taxonomy category, if this error belongs to one
    ///
    /// Session-control errors (`Busy`, `InvalidState`, `Cancelled`) are
    /// caller mistakes or races, not pipeline failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineError::Device(_) => Some(ErrorKind::Device),
            PipelineError::Auth(_) => Some(ErrorKind::Auth),
            PipelineError::Network(_) => Some(ErrorKind::Network),
            PipelineError::Decode(_) => Some(ErrorKind::Decode),
            PipelineError::Protocol(_) => Some(ErrorKind::Protocol),
            PipelineError::Busy | PipelineError::InvalidState(_) | PipelineError::Cancelled => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
