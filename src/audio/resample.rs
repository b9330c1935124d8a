//! Sample-rate conversion at the device edge
//!
//! The pipeline itself runs at fixed rates (16kHz capture, 24kHz render).
//! Devices and files that use another rate are converted here, with rubato's
//! FFT resampler on mono f32 samples.

use rubato::{FftFixedIn, Resampler};

use crate::error::{PipelineError, Result};

/// Input frames handed to the resampler per call
const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Streaming mono rate converter
///
/// Accepts input in any block size and emits whatever output is ready.
pub struct RateConverter {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl RateConverter {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
            .map_err(|e| {
                PipelineError::Device(format!(
                    "cannot convert {}Hz to {}Hz: {}",
                    from_rate, to_rate, e
                ))
            })?;

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    /// Input frames needed before the next block of output appears
    pub fn input_frames_next(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Convert `samples`, appending any finished output to `out`
    pub fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(samples);

        let mut consumed = 0;
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }

            let input: [&[f32]; 1] = [&self.pending[consumed..consumed + needed]];
            let converted = self
                .resampler
                .process(&input[..], None)
                .map_err(|e| PipelineError::Device(format!("resampling failed: {}", e)))?;
            out.extend_from_slice(&converted[0]);
            consumed += needed;
        }

        self.pending.drain(..consumed);
        Ok(())
    }

    /// Convert whatever input is still buffered, zero-padding the last block
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let tail = std::mem::take(&mut self.pending);
        let input: [&[f32]; 1] = [tail.as_slice()];
        let converted = self
            .resampler
            .process_partial(Some(&input[..]), None)
            .map_err(|e| PipelineError::Device(format!("resampling failed: {}", e)))?;
        out.extend_from_slice(&converted[0]);

        Ok(())
    }
}

/// Convert a whole buffer, with the resampler delay trimmed
///
/// The output has `round(len * to / from)` samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;

    let mut converter = RateConverter::new(from_rate, to_rate)?;
    let delay = converter.resampler.output_delay();

    let mut out = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    converter.push(samples, &mut out)?;
    converter.flush(&mut out)?;

    while out.len() < expected + delay {
        let converted = converter
            .resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| PipelineError::Device(format!("resampling failed: {}", e)))?;
        if converted[0].is_empty() {
            break;
        }
        out.extend_from_slice(&converted[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_a_copy() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn test_resample_length() {
        let samples = vec![0.25f32; 4800];

        let down = resample(&samples, 48000, 16000).unwrap();
        assert_eq!(down.len(), 1600);

        let up = resample(&samples, 24000, 48000).unwrap();
        assert_eq!(up.len(), 9600);
    }

    #[test]
    fn test_resample_keeps_level() {
        let samples = vec![0.25f32; 19200];

        let down = resample(&samples, 48000, 16000).unwrap();

        // Away from the edges a constant stays constant
        let middle = &down[2000..4400];
        assert!(middle.iter().all(|&s| (s - 0.25).abs() < 0.02));
    }

    #[test]
    fn test_streaming_emits_in_blocks() {
        let mut converter = RateConverter::new(48000, 16000).unwrap();
        let mut out = Vec::new();

        converter.push(&[0.0; 100], &mut out).unwrap();
        assert!(out.is_empty(), "Not enough input for one block yet");

        converter.push(&[0.0; 2000], &mut out).unwrap();
        assert!(!out.is_empty());
    }
}
