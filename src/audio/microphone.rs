//! Microphone capture via cpal

use cpal::traits::{DeviceTrait, HostTrait};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use super::backend::{pick_stream_config, AudioBackendConfig, BlockAccumulator, CaptureBackend, DeviceThread, SampleBlock};
use super::framer::CAPTURE_SAMPLE_RATE;
use super::resample::RateConverter;
use crate::error::{PipelineError, Result};

/// Captures mono audio from the default input device
pub struct CpalMicrophone {
    config: AudioBackendConfig,
    device_thread: Option<DeviceThread>,
}

impl CpalMicrophone {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            device_thread: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>> {
        if self.device_thread.is_some() {
            return Err(PipelineError::Device("microphone already capturing".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let config = self.config.clone();

        // Opening a device can block for a while on some hosts
        let device_thread = tokio::task::spawn_blocking(move || {
            DeviceThread::spawn("natiq-capture", move || build_input_stream(&config, tx))
        })
        .await
        .map_err(|e| PipelineError::Device(format!("capture setup task failed: {}", e)))??;

        self.device_thread = Some(device_thread);

        info!(
            "Microphone capture started ({}Hz, {} samples/block)",
            CAPTURE_SAMPLE_RATE, self.config.block_size
        );

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut device_thread) = self.device_thread.take() {
            device_thread.stop();
            info!("Microphone released");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.device_thread.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

fn build_input_stream(config: &AudioBackendConfig, tx: mpsc::Sender<SampleBlock>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| PipelineError::Device("no input device available".to_string()))?;

    let native = device.default_input_config().ok().map(|c| c.sample_rate().0);
    let ranges = device
        .supported_input_configs()
        .map_err(|e| PipelineError::Device(e.to_string()))?;

    let supported = pick_stream_config(ranges, CAPTURE_SAMPLE_RATE, native)
        .ok_or_else(|| PipelineError::Device("input device has no f32 capture format".to_string()))?;

    let device_rate = supported.sample_rate().0;
    let stream_config = supported.config();
    let channels = stream_config.channels.max(1) as usize;

    // Devices that cannot capture at 16kHz are converted in the callback
    let mut converter = if device_rate == CAPTURE_SAMPLE_RATE {
        None
    } else {
        Some(RateConverter::new(device_rate, CAPTURE_SAMPLE_RATE)?)
    };

    debug!(
        "Input device {} at {}Hz, {} channels{}",
        device.name().unwrap_or_default(),
        device_rate,
        channels,
        if converter.is_some() { ", converting to 16kHz" } else { "" }
    );

    let mut accumulator = BlockAccumulator::new(config.block_size);
    let mut mono: Vec<f32> = Vec::new();
    let mut converted: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Keep the first channel only
                mono.clear();
                mono.extend(data.chunks(channels).map(|frame| frame[0]));

                let samples = match converter.as_mut() {
                    Some(converter) => {
                        converted.clear();
                        if let Err(e) = converter.push(&mono, &mut converted) {
                            warn!("Dropping captured audio: {}", e);
                            return;
                        }
                        &converted
                    }
                    None => &mono,
                };

                accumulator.push(samples, |block| match tx.try_send(block) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("Capture queue full, dropping block"),
                    Err(TrySendError::Closed(_)) => {}
                });
            },
            |err| {
                error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| PipelineError::Device(e.to_string()))
}
