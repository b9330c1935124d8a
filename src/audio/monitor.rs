//! Spectral taps on the input and output audio paths
//!
//! Taps receive copies of the audio flowing through each path and turn the
//! most recent window into byte magnitudes for visualization. They are never
//! in the data path: feeding a tap uses `try_lock` and gives up rather than
//! wait, and an inactive tap reports a flat (all-zero) spectrum.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Analysis window length in samples
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Weight of the previous snapshot when smoothing
pub const DEFAULT_SMOOTHING: f32 = 0.8;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Configuration for the path monitor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Window length (power of two); snapshots have `fft_size / 2` bins
    pub fft_size: usize,
    /// Temporal smoothing in [0, 1)
    pub smoothing: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            smoothing: DEFAULT_SMOOTHING,
        }
    }
}

impl MonitorConfig {
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }
}

struct TapState {
    history: VecDeque<f32>,
    smoothed: Vec<f32>,
}

/// Non-owning tap on one audio path
pub struct SpectrumTap {
    name: &'static str,
    fft_size: usize,
    smoothing: f32,
    active: AtomicBool,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    state: Mutex<TapState>,
}

impl SpectrumTap {
    pub fn new(name: &'static str, config: MonitorConfig) -> Self {
        let fft_size = config.fft_size.max(2);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Self {
            name,
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 0.99),
            active: AtomicBool::new(false),
            fft,
            window: blackman_window(fft_size),
            state: Mutex::new(TapState {
                history: VecDeque::from(vec![0.0; fft_size]),
                smoothed: vec![0.0; fft_size / 2],
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start accepting audio
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
        debug!("{} tap activated", self.name);
    }

    /// Stop accepting audio and forget everything seen so far
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.history.iter_mut().for_each(|s| *s = 0.0);
        state.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }

    /// Copy samples into the analysis window
    ///
    /// Skipped when inactive or when a snapshot holds the lock.
    pub fn push(&self, samples: &[f32]) {
        if !self.is_active() || samples.is_empty() {
            return;
        }

        let Ok(mut state) = self.state.try_lock() else {
            return;
        };

        let tail = &samples[samples.len().saturating_sub(self.fft_size)..];
        for &sample in tail {
            state.history.pop_front();
            state.history.push_back(sample);
        }
    }

    /// Byte magnitudes (0-255) for `fft_size / 2` frequency bins
    ///
    /// All zeros when the path is inactive.
    pub fn snapshot(&self) -> Vec<u8> {
        let bins = self.bins();
        if !self.is_active() {
            return vec![0; bins];
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut buffer: Vec<Complex<f32>> = state
            .history
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let scale = 1.0 / self.fft_size as f32;
        let smoothing = self.smoothing;

        let magnitudes: Vec<u8> = buffer
            .iter()
            .take(bins)
            .zip(state.smoothed.iter_mut())
            .map(|(bin, smoothed)| {
                *smoothed = smoothing * *smoothed + (1.0 - smoothing) * bin.norm() * scale;
                to_byte(*smoothed)
            })
            .collect();

        magnitudes
    }
}

/// Magnitude to the analyser byte scale: [-100dB, -30dB] -> [0, 255]
fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }

    let db = 20.0 * magnitude.log10();
    let scaled = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS) * 255.0;
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman_window(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|i| {
            let x = 2.0 * PI * i as f32 / n;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}

/// Spectral taps on both sides of the conversation
#[derive(Clone)]
pub struct AudioPathMonitor {
    input: Arc<SpectrumTap>,
    output: Arc<SpectrumTap>,
}

impl AudioPathMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            input: Arc::new(SpectrumTap::new("input", config)),
            output: Arc::new(SpectrumTap::new("output", config)),
        }
    }

    /// Tap on the captured (pre-framer) audio
    pub fn input(&self) -> &Arc<SpectrumTap> {
        &self.input
    }

    /// Tap on the rendered (post-scheduler) audio
    pub fn output(&self) -> &Arc<SpectrumTap> {
        &self.output
    }

    pub fn input_snapshot(&self) -> Vec<u8> {
        self.input.snapshot()
    }

    pub fn output_snapshot(&self) -> Vec<u8> {
        self.output.snapshot()
    }
}
