pub mod gemini;
pub mod messages;
pub mod transport;

pub use gemini::{GeminiLiveTransport, RemoteConfig};
pub use messages::{ClientMessage, ServerMessage};
pub use transport::{Credential, FrameSink, LinkEnds, LiveTransport, RemoteEvent, RemoteLink, SendError};
