use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::clock::OutputClock;
use super::framer::CAPTURE_SAMPLE_RATE;
use super::monitor::SpectrumTap;
use super::playback::PlaybackScheduler;
use crate::error::{PipelineError, Result};

/// One fixed-size block of captured mono samples (one audio callback's worth)
pub type SampleBlock = Vec<f32>;

/// Configuration for audio backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioBackendConfig {
    /// Samples per capture block, at the 16kHz capture rate
    pub block_size: usize,
    /// Blocks buffered between the capture callback and the uplink
    /// before new blocks are dropped
    pub queue_depth: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            block_size: 4096, // 256ms at 16kHz
            queue_depth: 32,
        }
    }
}

impl AudioBackendConfig {
    /// Wall-clock length of one capture block (never zero)
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.block_size.max(1) as f64 / CAPTURE_SAMPLE_RATE as f64)
    }
}

/// Audio capture backend
///
/// Implementations:
/// - `CpalMicrophone`: default input device via cpal
/// - `WavFileCapture`: 16kHz mono WAV file, paced like a live device
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns a channel receiver that yields fixed-size sample blocks.
    /// The producer never waits on the consumer: when the channel is
    /// full, blocks are dropped.
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio render backend
///
/// Owns the output device and drives `PlaybackScheduler::render` from the
/// device clock.
pub trait RenderBackend: Send + Sync {
    /// Clock that advances as the device consumes audio
    fn clock(&self) -> Arc<dyn OutputClock>;

    /// Open the output device and start rendering scheduled audio
    fn start(&mut self, scheduler: Arc<PlaybackScheduler>, tap: Arc<SpectrumTap>) -> Result<()>;

    /// Stop rendering and release the device
    fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently rendering
    fn is_rendering(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture source type
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Default microphone
    Microphone,
    /// WAV file input (headless runs and testing)
    File(PathBuf),
}

/// Render sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSink {
    /// Default output device
    Speaker,
    /// No device; audio is rendered and discarded on a timer
    Null,
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn capture(source: CaptureSource, config: AudioBackendConfig) -> Box<dyn CaptureBackend> {
        match source {
            CaptureSource::Microphone => Box::new(super::microphone::CpalMicrophone::new(config)),
            CaptureSource::File(path) => Box::new(super::file::WavFileCapture::new(path, config)),
        }
    }

    /// Create a render backend for the given sink
    pub fn render(sink: RenderSink) -> Box<dyn RenderBackend> {
        match sink {
            RenderSink::Speaker => Box::new(super::speaker::CpalSpeaker::new()),
            RenderSink::Null => Box::new(super::speaker::NullRender::new()),
        }
    }
}

/// Cuts an arbitrary stream of samples into fixed-size blocks
pub(crate) struct BlockAccumulator {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAccumulator {
    pub(crate) fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples, emitting every block that fills up
    pub(crate) fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(SampleBlock)) {
        while !samples.is_empty() {
            let take = (self.block_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(block);
            }
        }
    }

    /// Zero-pad and emit the partial block, if any
    pub(crate) fn flush(&mut self, mut emit: impl FnMut(SampleBlock)) {
        if self.pending.is_empty() {
            return;
        }

        let mut block = std::mem::take(&mut self.pending);
        block.resize(self.block_size, 0.0);
        emit(block);
    }
}

/// Choose an f32 stream config for a device
///
/// Prefers the pipeline rate so no conversion is needed, then the device's
/// default rate, then the highest rate the device offers. Fewer channels win
/// among equals. The returned config's rate is what the stream runs at.
pub(crate) fn pick_stream_config(
    ranges: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
    wanted: u32,
    native: Option<u32>,
) -> Option<cpal::SupportedStreamConfig> {
    let mut ranges: Vec<_> = ranges
        .filter(|range| range.sample_format() == cpal::SampleFormat::F32)
        .collect();
    ranges.sort_by_key(|range| range.channels());

    let supports = |range: &cpal::SupportedStreamConfigRange, rate: u32| {
        range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate
    };

    if let Some(range) = ranges.iter().find(|range| supports(range, wanted)) {
        return Some(range.clone().with_sample_rate(cpal::SampleRate(wanted)));
    }

    if let Some(rate) = native {
        if let Some(range) = ranges.iter().find(|range| supports(range, rate)) {
            return Some(range.clone().with_sample_rate(cpal::SampleRate(rate)));
        }
    }

    ranges.into_iter().next().map(|range| range.with_max_sample_rate())
}

/// Dedicated thread that owns a cpal stream
///
/// cpal streams are not `Send` on every platform, so each one lives on its
/// own thread from build to drop. `stop` signals the thread and joins it.
pub(crate) struct DeviceThread {
    name: String,
    shutdown: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceThread {
    /// Spawn the thread, build and play the stream, and wait until it is running
    pub(crate) fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        use cpal::traits::StreamTrait;

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PipelineError::Device(format!(
                        "failed to start stream: {}",
                        e
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Returns on stop() or when the owner is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| PipelineError::Device(format!("failed to spawn {}: {}", name, e)))?;

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(PipelineError::Device(format!("{} exited during setup", name))));

        if let Err(e) = outcome {
            let _ = handle.join();
            return Err(e);
        }

        info!("{} running", name);

        Ok(Self {
            name: name.to_string(),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Drop the stream and join the thread; idempotent
    pub(crate) fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} panicked", self.name);
            } else {
                info!("{} stopped", self.name);
            }
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_emits_fixed_blocks() {
        let mut acc = BlockAccumulator::new(4);
        let mut blocks = Vec::new();

        acc.push(&[1.0, 2.0, 3.0], |b| blocks.push(b));
        assert!(blocks.is_empty());

        acc.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |b| blocks.push(b));
        assert_eq!(blocks, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);

        acc.flush(|b| blocks.push(b));
        assert_eq!(blocks[2], vec![9.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_accumulator_flush_without_pending() {
        let mut acc = BlockAccumulator::new(4);
        let mut count = 0;
        acc.flush(|_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_block_duration() {
        let config = AudioBackendConfig::default();
        assert_eq!(config.block_duration().as_millis(), 256);
    }

    #[test]
    fn test_block_duration_is_never_zero() {
        let config = AudioBackendConfig {
            block_size: 0,
            ..AudioBackendConfig::default()
        };
        assert!(config.block_duration() > std::time::Duration::ZERO);
    }

    fn range(channels: u16, min: u32, max: u32, format: cpal::SampleFormat) -> cpal::SupportedStreamConfigRange {
        cpal::SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_pick_prefers_pipeline_rate() {
        let ranges = vec![
            range(2, 8000, 48000, cpal::SampleFormat::F32),
            range(1, 8000, 48000, cpal::SampleFormat::F32),
        ];

        let picked = pick_stream_config(ranges.into_iter(), 24000, Some(48000)).unwrap();
        assert_eq!(picked.sample_rate().0, 24000);
        assert_eq!(picked.channels(), 1);
    }

    #[test]
    fn test_pick_falls_back_to_native_rate() {
        let ranges = vec![
            range(2, 44100, 44100, cpal::SampleFormat::F32),
            range(2, 48000, 48000, cpal::SampleFormat::F32),
            range(1, 16000, 16000, cpal::SampleFormat::I16),
        ];

        let picked = pick_stream_config(ranges.into_iter(), 16000, Some(48000)).unwrap();
        assert_eq!(picked.sample_rate().0, 48000);

        let none = pick_stream_config(std::iter::empty(), 16000, None);
        assert!(none.is_none());
    }
}
