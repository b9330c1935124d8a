pub mod backend;
pub mod clock;
pub mod file;
pub mod framer;
pub mod microphone;
pub mod monitor;
pub mod playback;
pub mod resample;
pub mod speaker;

pub use backend::{
    AudioBackendConfig, AudioBackendFactory, CaptureBackend, CaptureSource, RenderBackend, RenderSink,
    SampleBlock,
};
pub use clock::{FrameClock, ManualClock, OutputClock};
pub use file::{AudioFile, WavFileCapture};
pub use framer::{AudioFrame, SampleFramer, CAPTURE_SAMPLE_RATE};
pub use microphone::CpalMicrophone;
pub use monitor::{AudioPathMonitor, MonitorConfig, SpectrumTap};
pub use playback::{
    DecodedChunk, InboundPayload, PlaybackScheduler, ScheduledChunk, SchedulerStats, RENDER_SAMPLE_RATE,
};
pub use resample::RateConverter;
pub use speaker::{CpalSpeaker, NullRender};
