pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod remote;
pub mod session;

pub use audio::{
    AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioPathMonitor, CaptureBackend, CaptureSource,
    InboundPayload, PlaybackScheduler, RenderBackend, RenderSink, SampleFramer,
};
pub use config::Config;
pub use error::{ErrorKind, PipelineError};
pub use http::{create_router, AppState};
pub use remote::{Credential, GeminiLiveTransport, LiveTransport, RemoteConfig};
pub use session::{
    ConversationController, ConversationSession, PersonaConfig, SendOutcome, SessionConfig, SessionEvent,
    SessionFactory, SessionParts, SessionState, SessionStats, VoiceName,
};
