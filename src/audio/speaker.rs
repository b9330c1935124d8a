//! Rendering scheduled playback to an output device

use cpal::traits::{DeviceTrait, HostTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backend::{pick_stream_config, DeviceThread, RenderBackend};
use super::clock::{FrameClock, OutputClock};
use super::monitor::SpectrumTap;
use super::playback::{PlaybackScheduler, RENDER_SAMPLE_RATE};
use super::resample::RateConverter;
use crate::error::{PipelineError, Result};

/// Plays scheduled audio on the default output device
///
/// The device callback pulls 24kHz blocks from the scheduler (which advances
/// the clock), feeds the output tap, converts to the device rate when the
/// device cannot play 24kHz, and fans mono out to every device channel.
pub struct CpalSpeaker {
    clock: Arc<FrameClock>,
    device_thread: Option<DeviceThread>,
}

impl CpalSpeaker {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(FrameClock::new(RENDER_SAMPLE_RATE)),
            device_thread: None,
        }
    }
}

impl Default for CpalSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for CpalSpeaker {
    fn clock(&self) -> Arc<dyn OutputClock> {
        self.clock.clone()
    }

    fn start(&mut self, scheduler: Arc<PlaybackScheduler>, tap: Arc<SpectrumTap>) -> Result<()> {
        if self.device_thread.is_some() {
            return Err(PipelineError::Device("speaker already rendering".to_string()));
        }

        let clock = Arc::clone(&self.clock);

        let device_thread =
            DeviceThread::spawn("natiq-render", move || build_output_stream(scheduler, tap, clock))?;
        self.device_thread = Some(device_thread);

        info!("Speaker output started");

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut device_thread) = self.device_thread.take() {
            device_thread.stop();
            info!("Speaker released");
        }

        Ok(())
    }

    fn is_rendering(&self) -> bool {
        self.device_thread.is_some()
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

fn build_output_stream(
    scheduler: Arc<PlaybackScheduler>,
    tap: Arc<SpectrumTap>,
    clock: Arc<FrameClock>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| PipelineError::Device("no output device available".to_string()))?;

    let native = device.default_output_config().ok().map(|c| c.sample_rate().0);
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PipelineError::Device(e.to_string()))?;

    let supported = pick_stream_config(ranges, RENDER_SAMPLE_RATE, native)
        .ok_or_else(|| PipelineError::Device("output device has no f32 playback format".to_string()))?;

    let device_rate = supported.sample_rate().0;
    let stream_config = supported.config();
    let channels = stream_config.channels.max(1) as usize;

    debug!(
        "Output device {} at {}Hz, {} channels",
        device.name().unwrap_or_default(),
        device_rate,
        channels
    );

    let mut source = if device_rate == RENDER_SAMPLE_RATE {
        OutputSource::Direct(Vec::new())
    } else {
        OutputSource::Converted(ConvertedOutput::new(device_rate)?)
    };

    device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                let mono = source.fill(frames, &scheduler, &tap, &clock);

                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(sample);
                }
            },
            |err| {
                error!("Audio playback error: {}", err);
            },
            None,
        )
        .map_err(|e| PipelineError::Device(e.to_string()))
}

/// Where the device callback gets its mono samples from
enum OutputSource {
    /// Device runs at 24kHz: render straight into the buffer
    Direct(Vec<f32>),
    /// Device runs at another rate: render 24kHz blocks and convert
    Converted(ConvertedOutput),
}

impl OutputSource {
    fn fill(&mut self, frames: usize, scheduler: &PlaybackScheduler, tap: &SpectrumTap, clock: &FrameClock) -> &[f32] {
        match self {
            OutputSource::Direct(mono) => {
                mono.resize(frames, 0.0);
                scheduler.render(clock, mono.as_mut_slice());
                tap.push(mono.as_slice());
                mono.as_slice()
            }
            OutputSource::Converted(output) => output.fill(frames, scheduler, tap, clock),
        }
    }
}

struct ConvertedOutput {
    converter: RateConverter,
    block: Vec<f32>,
    converted: Vec<f32>,
    fifo: VecDeque<f32>,
    out: Vec<f32>,
}

impl ConvertedOutput {
    fn new(device_rate: u32) -> Result<Self> {
        Ok(Self {
            converter: RateConverter::new(RENDER_SAMPLE_RATE, device_rate)?,
            block: Vec::new(),
            converted: Vec::new(),
            fifo: VecDeque::new(),
            out: Vec::new(),
        })
    }

    fn fill(&mut self, frames: usize, scheduler: &PlaybackScheduler, tap: &SpectrumTap, clock: &FrameClock) -> &[f32] {
        while self.fifo.len() < frames {
            self.block.resize(self.converter.input_frames_next(), 0.0);
            scheduler.render(clock, &mut self.block);
            tap.push(&self.block);

            self.converted.clear();
            if let Err(e) = self.converter.push(&self.block, &mut self.converted) {
                warn!("Playing silence: {}", e);
                break;
            }
            self.fifo.extend(self.converted.iter());
        }

        self.out.clear();
        self.out.extend(self.fifo.drain(..frames.min(self.fifo.len())));
        self.out.resize(frames, 0.0);
        &self.out
    }
}

/// Renders into a scratch buffer on a timer instead of a device
///
/// Keeps the clock moving in real time so scheduling behaves as it would
/// with a speaker attached.
pub struct NullRender {
    clock: Arc<FrameClock>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Render period of the null sink
const NULL_RENDER_PERIOD: Duration = Duration::from_millis(20);

impl NullRender {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(FrameClock::new(RENDER_SAMPLE_RATE)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Default for NullRender {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for NullRender {
    fn clock(&self) -> Arc<dyn OutputClock> {
        self.clock.clone()
    }

    fn start(&mut self, scheduler: Arc<PlaybackScheduler>, tap: Arc<SpectrumTap>) -> Result<()> {
        if self.handle.is_some() {
            return Err(PipelineError::Device("null sink already rendering".to_string()));
        }

        let frames = (RENDER_SAMPLE_RATE as f64 * NULL_RENDER_PERIOD.as_secs_f64()) as usize;
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("natiq-null-render".to_string())
            .spawn(move || {
                let mut block = vec![0.0f32; frames];
                while running.load(Ordering::SeqCst) {
                    scheduler.render(&clock, &mut block);
                    tap.push(&block);
                    std::thread::sleep(NULL_RENDER_PERIOD);
                }
            })
            .map_err(|e| PipelineError::Device(format!("failed to spawn null render: {}", e)))?;

        self.handle = Some(handle);
        info!("Null render started");

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Null render thread panicked");
            }
            info!("Null render stopped");
        }

        Ok(())
    }

    fn is_rendering(&self) -> bool {
        self.handle.is_some()
    }

    fn name(&self) -> &str {
        "null render"
    }
}

impl Drop for NullRender {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::monitor::MonitorConfig;
    use crate::audio::playback::InboundPayload;

    #[test]
    fn test_null_render_plays_out_scheduled_audio() {
        let mut sink = NullRender::new();
        let scheduler = Arc::new(PlaybackScheduler::new(sink.clock()));
        let tap = Arc::new(SpectrumTap::new("output", MonitorConfig::default()));

        // 10ms of audio
        scheduler
            .enqueue(InboundPayload::from_samples(&[1000; 240]))
            .unwrap();
        assert_eq!(scheduler.active_len(), 1);

        sink.start(Arc::clone(&scheduler), tap).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        sink.stop().unwrap();

        assert!(sink.clock().now() > 0.0);
        assert_eq!(scheduler.active_len(), 0);
        assert!(!sink.is_rendering());
    }
}
