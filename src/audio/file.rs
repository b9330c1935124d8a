use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackendConfig, BlockAccumulator, CaptureBackend, SampleBlock};
use super::framer::CAPTURE_SAMPLE_RATE;
use super::resample::resample;
use crate::error::{PipelineError, Result};

/// A WAV file loaded as float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .map_err(|e| PipelineError::Device(format!("failed to open WAV file: {}", e)))?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| PipelineError::Device(format!("failed to read audio samples: {}", e)))?;

        let duration_seconds = samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Samples in capture format: mono, 16kHz
    ///
    /// Channels are averaged and other rates are resampled.
    pub fn into_capture_samples(self) -> Result<Vec<f32>> {
        let channels = self.channels.max(1) as usize;
        let mono: Vec<f32> = if channels == 1 {
            self.samples
        } else {
            self.samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        if self.sample_rate != CAPTURE_SAMPLE_RATE {
            debug!("Resampling {} from {}Hz", self.path, self.sample_rate);
        }

        resample(&mono, self.sample_rate, CAPTURE_SAMPLE_RATE)
    }
}

/// Streams a WAV file as if it were a microphone
///
/// The file is converted to 16kHz mono up front. Blocks are emitted at the
/// rate a live device would produce them; the final partial block is
/// zero-padded.
pub struct WavFileCapture {
    path: PathBuf,
    config: AudioBackendConfig,
    paced: bool,
    task: Option<JoinHandle<()>>,
}

impl WavFileCapture {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            paced: true,
            task: None,
        }
    }

    /// Emit blocks as fast as the consumer takes them
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait::async_trait]
impl CaptureBackend for WavFileCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>> {
        if self.task.is_some() {
            return Err(PipelineError::Device("file capture already running".to_string()));
        }

        let samples = AudioFile::open(&self.path)?.into_capture_samples()?;

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let block_size = self.config.block_size;
        let period = self.config.block_duration();
        let paced = self.paced;

        let task = tokio::spawn(async move {
            let mut accumulator = BlockAccumulator::new(block_size);
            let mut blocks = Vec::new();
            accumulator.push(&samples, |block| blocks.push(block));
            accumulator.flush(|block| blocks.push(block));

            let mut ticker = tokio::time::interval(period);
            let total = blocks.len();

            for block in blocks {
                if paced {
                    ticker.tick().await;
                    match tx.try_send(block) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => debug!("Capture queue full, dropping block"),
                        Err(TrySendError::Closed(_)) => break,
                    }
                } else if tx.send(block).await.is_err() {
                    break;
                }
            }

            info!("File capture finished ({} blocks)", total);
        });

        self.task = Some(task);

        info!("File capture started: {}", self.path.display());

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
