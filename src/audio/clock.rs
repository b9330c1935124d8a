//! Output clocks
//!
//! Playback is scheduled against the output device's notion of "now".
//! The clock is a trait so scheduling can be driven by a manual clock in tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Time source for scheduling, in seconds
pub trait OutputClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock driven by the render callback: frames rendered / sample rate
#[derive(Debug)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Frames rendered so far; the index of the next frame to render
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl OutputClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}
