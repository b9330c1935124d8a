// Float capture blocks to outbound 16-bit PCM frames
//
// The framer does not resample: callers hand it blocks that are already
// 16kHz mono. Out-of-range samples are clamped, never rejected.

/// Outbound sample rate (16kHz mono for the speech model)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// One outbound frame of 16-bit PCM (mono)
///
/// Frames are immutable once built; the transmit path takes ownership
/// and drops them after submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
    sequence: u64,
}

impl AudioFrame {
    /// Build a frame from PCM that is already at the outbound format
    pub fn from_pcm(samples: Vec<i16>, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            sequence,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Position of this frame in the capture stream (0-indexed)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    /// Little-endian PCM bytes, as sent on the wire
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Converts captured float blocks into `AudioFrame`s, one per block
#[derive(Debug, Default)]
pub struct SampleFramer {
    next_sequence: u64,
}

impl SampleFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame one capture block
    ///
    /// The output has exactly as many samples as the input block.
    pub fn frame(&mut self, block: &[f32]) -> AudioFrame {
        let samples = block.iter().map(|&s| to_pcm16(s)).collect();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        AudioFrame::from_pcm(samples, sequence)
    }

    /// Number of frames produced so far
    pub fn frames_produced(&self) -> u64 {
        self.next_sequence
    }
}

/// `round(clamp(s, -1, 1) * 32767)`; NaN maps to silence
pub fn to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }

    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}
