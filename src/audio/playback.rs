// Inbound audio decode and gapless playback scheduling
//
// Each inbound payload is decoded into a chunk and scheduled on the output
// clock at max(cursor, now). The cursor then advances by the chunk duration,
// so consecutive chunks play back to back without overlap, and a chunk that
// arrives after the cursor has fallen behind starts at "now" instead of in
// the past. An interruption drops every active node and resets the cursor.

use base64::Engine;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::clock::{FrameClock, OutputClock};
use crate::error::{PipelineError, Result};

/// Sample rate of synthesized speech from the remote model
pub const RENDER_SAMPLE_RATE: u32 = 24000;

/// Bytes per inbound PCM sample
pub const PCM_SAMPLE_WIDTH: u16 = 2;

/// Encoded chunk of synthesized speech, as received from the remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    /// Base64-encoded little-endian PCM
    pub data: String,
    /// Declared sample rate in Hz
    pub sample_rate: u32,
    /// Declared bytes per sample
    pub sample_width: u16,
}

impl InboundPayload {
    /// Payload in the model's native output format (24kHz, 16-bit mono)
    pub fn pcm24k(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            sample_rate: RENDER_SAMPLE_RATE,
            sample_width: PCM_SAMPLE_WIDTH,
        }
    }

    /// Encode raw samples as a 24kHz payload
    pub fn from_samples(samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::pcm24k(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// Decoded PCM buffer ready to be scheduled
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl DecodedChunk {
    /// Decode a payload; the output format is fixed at 24kHz mono
    pub fn decode(payload: &InboundPayload) -> Result<Self> {
        if payload.sample_rate != RENDER_SAMPLE_RATE {
            return Err(PipelineError::Decode(format!(
                "unsupported sample rate {}Hz (expected {}Hz)",
                payload.sample_rate, RENDER_SAMPLE_RATE
            )));
        }

        if payload.sample_width != PCM_SAMPLE_WIDTH {
            return Err(PipelineError::Decode(format!(
                "unsupported sample width {} bytes",
                payload.sample_width
            )));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.data.as_bytes())
            .map_err(|e| PipelineError::Decode(format!("invalid base64: {}", e)))?;

        if bytes.len() % 2 != 0 {
            return Err(PipelineError::Decode(format!(
                "odd PCM byte count ({})",
                bytes.len()
            )));
        }

        let samples: Arc<[f32]> = bytes
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
            .collect();

        Ok(Self {
            samples,
            sample_rate: RENDER_SAMPLE_RATE,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds (sample count / sample rate)
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Where and when a chunk was placed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub node_id: u64,
    pub start: f64,
    pub duration: f64,
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SchedulerStats {
    pub chunks_scheduled: u64,
    pub decode_errors: u64,
    pub nodes_stopped: u64,
}

/// A scheduled-but-not-finished chunk
struct OutputNode {
    id: u64,
    start: f64,
    chunk: DecodedChunk,
}

impl OutputNode {
    fn end(&self) -> f64 {
        self.start + self.chunk.duration()
    }
}

struct SchedulerState {
    cursor: f64,
    active: Vec<OutputNode>,
    next_node_id: u64,
    closed: bool,
    stats: SchedulerStats,
}

/// Decodes inbound payloads and schedules them for gapless playback
pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    sample_rate: u32,
    gain: f32,
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn OutputClock>) -> Self {
        Self {
            clock,
            sample_rate: RENDER_SAMPLE_RATE,
            gain: 1.0,
            state: Mutex::new(SchedulerState {
                cursor: 0.0,
                active: Vec::new(),
                next_node_id: 0,
                closed: false,
                stats: SchedulerStats::default(),
            }),
        }
    }

    /// Linear gain applied to everything rendered
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain.max(0.0);
        self
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode a payload and schedule it at `max(cursor, now)`
    ///
    /// Returns `Ok(None)` when nothing was scheduled (empty payload, or the
    /// scheduler has been torn down). A decode failure is counted and
    /// returned, leaving the cursor and active nodes untouched.
    pub fn enqueue(&self, payload: InboundPayload) -> Result<Option<ScheduledChunk>> {
        let chunk = match DecodedChunk::decode(&payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.state().stats.decode_errors += 1;
                warn!("Skipping inbound audio chunk: {}", e);
                return Err(e);
            }
        };
        drop(payload);

        let mut state = self.state();

        if state.closed {
            debug!("Scheduler torn down, dropping {} samples", chunk.len());
            return Ok(None);
        }

        if chunk.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        state.active.retain(|node| node.end() > now);

        let start = state.cursor.max(now);
        let duration = chunk.duration();
        state.cursor = start + duration;

        let id = state.next_node_id;
        state.next_node_id += 1;
        state.active.push(OutputNode { id, start, chunk });
        state.stats.chunks_scheduled += 1;

        debug!(
            "Scheduled chunk {} at {:.3}s ({:.3}s, now {:.3}s)",
            id, start, duration, now
        );

        Ok(Some(ScheduledChunk {
            node_id: id,
            start,
            duration,
        }))
    }

    /// Stop every active node and reset the cursor
    ///
    /// Returns the number of nodes stopped. Safe to call with nothing playing.
    pub fn interrupt(&self) -> usize {
        let mut state = self.state();
        let stopped = state.active.len();

        state.active.clear();
        state.cursor = 0.0;
        state.stats.nodes_stopped += stopped as u64;

        debug!("Playback interrupted, {} nodes stopped", stopped);

        stopped
    }

    /// Interrupt and refuse further scheduling
    pub fn teardown(&self) {
        self.interrupt();

        let mut state = self.state();
        if !state.closed {
            state.closed = true;
            info!("Playback scheduler torn down");
        }
    }

    /// Mix the next `out.len()` frames of the render clock into `out`
    ///
    /// Reads the block position from `clock` and advances it before the
    /// scheduler lock is released, so `enqueue` never observes a "now" that
    /// has already been rendered. `clock` must be the clock this scheduler
    /// was built with. Nodes that end inside the block leave the active set.
    pub fn render(&self, clock: &FrameClock, out: &mut [f32]) {
        out.fill(0.0);

        let mut state = self.state();
        let first_frame = clock.frames();
        clock.advance(out.len() as u64);

        if state.active.is_empty() {
            return;
        }

        let rate = self.sample_rate as f64;
        let block_end = first_frame + out.len() as u64;

        for node in &state.active {
            let node_start = (node.start * rate).round() as u64;
            let node_end = node_start + node.chunk.len() as u64;

            if node_end <= first_frame || node_start >= block_end {
                continue;
            }

            let samples = node.chunk.samples();
            for frame in node_start.max(first_frame)..node_end.min(block_end) {
                out[(frame - first_frame) as usize] += samples[(frame - node_start) as usize];
            }
        }

        for sample in out.iter_mut() {
            *sample = (*sample * self.gain).clamp(-1.0, 1.0);
        }

        state
            .active
            .retain(|node| (node.start * rate).round() as u64 + node.chunk.len() as u64 > block_end);
    }

    /// Number of nodes still scheduled or playing
    pub fn active_len(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state();
        state.active.retain(|node| node.end() > now);
        state.active.len()
    }

    /// Earliest start time for the next chunk (0 after an interruption)
    pub fn cursor(&self) -> f64 {
        self.state().cursor
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn stats(&self) -> SchedulerStats {
        self.state().stats
    }
}
