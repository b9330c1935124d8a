use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{PersonaConfig, SessionConfig};
use super::state::{SendOutcome, SessionEvent, SessionState};
use super::stats::SessionStats;
use crate::audio::{
    AudioFrame, AudioPathMonitor, CaptureBackend, PlaybackScheduler, RenderBackend, SampleBlock, SampleFramer,
};
use crate::error::{ErrorKind, PipelineError, Result};
use crate::remote::{Credential, FrameSink, LiveTransport, RemoteEvent, RemoteLink, SendError};

/// Everything a session needs from the outside world
pub struct SessionParts {
    pub capture: Box<dyn CaptureBackend>,
    pub render: Box<dyn RenderBackend>,
    pub transport: Arc<dyn LiveTransport>,
    /// `None` fails the connect with an auth error
    pub credential: Option<Credential>,
}

/// Acquired resources, each taken exactly once on teardown
struct Resources {
    capture: Option<Box<dyn CaptureBackend>>,
    render: Option<Box<dyn RenderBackend>>,
    uplink: Option<JoinHandle<()>>,
    downlink: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_muted: AtomicU64,
    frames_congested: AtomicU64,
    interruptions: AtomicU64,
}

/// State shared between the session handle and its uplink/downlink tasks
struct Inner {
    id: String,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    muted: AtomicBool,
    /// Capture is running and feeding the uplink
    input_live: AtomicBool,
    counters: Counters,
    sink: RwLock<Option<FrameSink>>,
    scheduler: Arc<PlaybackScheduler>,
    monitor: Arc<AudioPathMonitor>,
    started_at: StdMutex<Option<DateTime<Utc>>>,
    resources: Mutex<Resources>,
}

/// One live voice conversation
///
/// Owns the microphone, the speaker, the remote link and the tasks moving
/// audio between them. A session is used once: after it closes or fails,
/// start a new one.
pub struct ConversationSession {
    inner: Arc<Inner>,
    transport: Arc<dyn LiveTransport>,
    credential: Option<Credential>,
}

impl ConversationSession {
    pub fn new(config: SessionConfig, parts: SessionParts) -> Self {
        let scheduler = Arc::new(PlaybackScheduler::new(parts.render.clock()).with_gain(config.output_gain));
        let monitor = Arc::new(AudioPathMonitor::new(config.monitor));
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let id = format!("conversation-{}", uuid::Uuid::new_v4());

        debug!(
            "Created session {} (capture: {}, render: {}, transport: {})",
            id,
            parts.capture.name(),
            parts.render.name(),
            parts.transport.name()
        );

        Self {
            inner: Arc::new(Inner {
                id,
                state,
                events,
                muted: AtomicBool::new(false),
                input_live: AtomicBool::new(false),
                counters: Counters::default(),
                sink: RwLock::new(None),
                scheduler,
                monitor,
                started_at: StdMutex::new(None),
                resources: Mutex::new(Resources {
                    capture: Some(parts.capture),
                    render: Some(parts.render),
                    uplink: None,
                    downlink: None,
                }),
            }),
            transport: parts.transport,
            credential: parts.credential,
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Observe session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Acquire devices and open the remote session
    ///
    /// Order: credential, microphone, input path, output path, remote.
    /// Any failure tears down whatever was acquired before returning. A
    /// `disconnect` during connect makes this return `Cancelled`.
    pub async fn connect(&self, persona: &PersonaConfig) -> Result<()> {
        let began = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });

        if !began {
            return Err(PipelineError::InvalidState(self.state().to_string()));
        }

        info!(
            "Connecting session {} (voice {}, {} / {}, {})",
            self.inner.id, persona.voice, persona.country, persona.dialect, persona.tone
        );

        match self.establish(persona).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.inner.abandon_connect(err).await),
        }
    }

    async fn establish(&self, persona: &PersonaConfig) -> Result<()> {
        let inner = &self.inner;

        let credential = self
            .credential
            .clone()
            .ok_or_else(|| PipelineError::Auth("no API key configured".to_string()))?;

        // Microphone
        let blocks = {
            let mut resources = inner.resources.lock().await;
            inner.ensure_connecting()?;
            let capture = resources
                .capture
                .as_mut()
                .ok_or_else(|| PipelineError::InvalidState("capture released".to_string()))?;
            capture.start().await?
        };

        // Input path
        {
            let mut resources = inner.resources.lock().await;
            inner.ensure_connecting()?;
            inner.input_live.store(true, Ordering::SeqCst);
            if !inner.muted.load(Ordering::SeqCst) {
                inner.monitor.input().activate();
            }
            resources.uplink = Some(tokio::spawn(uplink(Arc::clone(inner), blocks)));
        }

        // Output path
        {
            let mut resources = inner.resources.lock().await;
            inner.ensure_connecting()?;
            let render = resources
                .render
                .as_mut()
                .ok_or_else(|| PipelineError::InvalidState("render released".to_string()))?;
            render.start(Arc::clone(&inner.scheduler), Arc::clone(inner.monitor.output()))?;
            inner.monitor.output().activate();
        }

        // Remote
        let mut state_rx = inner.state.subscribe();
        let link = tokio::select! {
            link = self.transport.open(persona, &credential) => link?,
            _ = state_rx.wait_for(|state| *state != SessionState::Connecting) => {
                return Err(PipelineError::Cancelled);
            }
        };

        let RemoteLink { sink, events } = link;

        let mut resources = inner.resources.lock().await;
        if let Err(e) = inner.ensure_connecting() {
            sink.close();
            return Err(e);
        }

        *inner.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        resources.downlink = Some(tokio::spawn(downlink(Arc::clone(inner), events)));
        *inner.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        let opened = inner.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Open;
                true
            } else {
                false
            }
        });

        if !opened {
            return Err(PipelineError::Cancelled);
        }

        info!("Session {} open via {}", inner.id, self.transport.name());

        Ok(())
    }

    /// Hand one captured frame to the remote session without blocking
    pub fn send_frame(&self, frame: AudioFrame) -> SendOutcome {
        self.inner.send_frame(frame)
    }

    /// Takes effect from the next frame
    ///
    /// The input spectrum is flat while muted.
    pub fn set_muted(&self, muted: bool) {
        let was = self.inner.muted.swap(muted, Ordering::SeqCst);
        if was == muted {
            return;
        }

        if muted {
            self.inner.monitor.input().deactivate();
        } else if self.inner.input_live.load(Ordering::SeqCst) {
            self.inner.monitor.input().activate();
        }

        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// Release everything and close
    ///
    /// Safe to call at any time and any number of times. Returns once
    /// teardown has finished, whoever started it.
    pub async fn disconnect(&self) {
        info!("Disconnecting session {}", self.inner.id);
        self.inner.finish(SessionState::Closed, false).await;
    }

    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.inner.scheduler
    }

    pub fn monitor(&self) -> &Arc<AudioPathMonitor> {
        &self.inner.monitor
    }

    pub fn input_spectrum(&self) -> Vec<u8> {
        self.inner.monitor.input_snapshot()
    }

    pub fn output_spectrum(&self) -> Vec<u8> {
        self.inner.monitor.output_snapshot()
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        let inner = &self.inner;
        let started_at = *inner.started_at.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed_secs = started_at
            .map(|at| Utc::now().signed_duration_since(at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        let scheduler = inner.scheduler.stats();

        SessionStats {
            session_id: inner.id.clone(),
            state: self.state(),
            muted: self.is_muted(),
            started_at,
            elapsed_secs,
            frames_sent: inner.counters.frames_sent.load(Ordering::Relaxed),
            frames_muted: inner.counters.frames_muted.load(Ordering::Relaxed),
            frames_congested: inner.counters.frames_congested.load(Ordering::Relaxed),
            chunks_scheduled: scheduler.chunks_scheduled,
            decode_errors: scheduler.decode_errors,
            interruptions: inner.counters.interruptions.load(Ordering::Relaxed),
            active_nodes: inner.scheduler.active_len(),
        }
    }
}

impl Inner {
    fn ensure_connecting(&self) -> Result<()> {
        if *self.state.borrow() == SessionState::Connecting {
            Ok(())
        } else {
            Err(PipelineError::Cancelled)
        }
    }

    fn send_frame(&self, frame: AudioFrame) -> SendOutcome {
        if *self.state.borrow() != SessionState::Open {
            return SendOutcome::NotOpen;
        }

        if self.muted.load(Ordering::SeqCst) {
            self.counters.frames_muted.fetch_add(1, Ordering::Relaxed);
            return SendOutcome::Muted;
        }

        let sink = self.sink.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sink) = sink.as_ref() else {
            return SendOutcome::NotOpen;
        };

        let sequence = frame.sequence();
        match sink.send(frame) {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Sent
            }
            Err(SendError::Full) => {
                self.counters.frames_congested.fetch_add(1, Ordering::Relaxed);
                debug!("Outbound queue full, dropped frame {}", sequence);
                SendOutcome::Dropped
            }
            Err(SendError::Closed) => SendOutcome::NotOpen,
        }
    }

    /// Turn a connect error into the error the caller sees
    async fn abandon_connect(&self, err: PipelineError) -> PipelineError {
        match err.kind() {
            Some(kind) => {
                error!("Session {} failed to connect: {}", self.id, err);
                if self.finish(SessionState::Failed(kind), false).await {
                    err
                } else {
                    // A disconnect got there first
                    PipelineError::Cancelled
                }
            }
            None => {
                info!("Session {} connect abandoned: {}", self.id, err);
                self.finish(SessionState::Closed, false).await;
                err
            }
        }
    }

    /// Tear down once and settle in `final_state`
    ///
    /// Returns false when another caller is already tearing down; unless
    /// called from the downlink task, waits for that teardown to finish.
    async fn finish(&self, final_state: SessionState, from_downlink: bool) -> bool {
        let began = self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == SessionState::Closing {
                false
            } else {
                *state = SessionState::Closing;
                true
            }
        });

        if !began {
            if !from_downlink {
                let mut state_rx = self.state.subscribe();
                let _ = state_rx.wait_for(SessionState::is_terminal).await;
            }
            return false;
        }

        self.teardown(from_downlink).await;

        self.state.send_replace(final_state);
        let event = match final_state {
            SessionState::Failed(kind) => SessionEvent::Error { kind },
            _ => SessionEvent::Closed,
        };
        let _ = self.events.send(event);

        info!("Session {} {}", self.id, final_state);

        true
    }

    async fn teardown(&self, from_downlink: bool) {
        let mut resources = self.resources.lock().await;

        // Remote
        let sink = self.sink.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sink) = sink {
            sink.close();
        }
        if let Some(downlink) = resources.downlink.take() {
            // The downlink task may be the one running this teardown
            if !from_downlink {
                downlink.abort();
            }
        }

        // Output path
        self.scheduler.teardown();
        if let Some(mut render) = resources.render.take() {
            if let Err(e) = render.stop() {
                warn!("Failed to stop {}: {}", render.name(), e);
            }
        }
        self.monitor.output().deactivate();

        // Input path
        self.input_live.store(false, Ordering::SeqCst);
        if let Some(uplink) = resources.uplink.take() {
            uplink.abort();
        }
        if let Some(mut capture) = resources.capture.take() {
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop {}: {}", capture.name(), e);
            }
        }
        self.monitor.input().deactivate();

        debug!("Session {} resources released", self.id);
    }
}

/// Microphone blocks to the remote session
async fn uplink(inner: Arc<Inner>, mut blocks: mpsc::Receiver<SampleBlock>) {
    let mut framer = SampleFramer::new();
    debug!("Uplink started");

    while let Some(block) = blocks.recv().await {
        if !inner.muted.load(Ordering::SeqCst) {
            inner.monitor.input().push(&block);
        }
        inner.send_frame(framer.frame(&block));
    }

    debug!("Uplink finished after {} frames", framer.frames_produced());
}

/// Remote events to playback, strictly in arrival order
async fn downlink(inner: Arc<Inner>, mut events: mpsc::Receiver<RemoteEvent>) {
    debug!("Downlink started");

    while let Some(event) = events.recv().await {
        match event {
            RemoteEvent::Audio(payload) => match inner.scheduler.enqueue(payload) {
                Ok(Some(chunk)) => {
                    let _ = inner.events.send(SessionEvent::AudioScheduled {
                        sequence: chunk.node_id,
                        start: chunk.start,
                        duration: chunk.duration,
                    });
                }
                Ok(None) => {}
                Err(e) => debug!("Skipped inbound chunk: {}", e),
            },
            RemoteEvent::Interrupted => {
                // Playback must be silent before anyone hears about it
                let stopped = inner.scheduler.interrupt();
                inner.counters.interruptions.fetch_add(1, Ordering::Relaxed);
                info!("Interrupted ({} queued chunks dropped)", stopped);
                let _ = inner.events.send(SessionEvent::Interrupted);
            }
            RemoteEvent::TurnComplete => {
                debug!("Turn complete");
                let _ = inner.events.send(SessionEvent::TurnComplete);
            }
            RemoteEvent::Closed { reason } => {
                info!(
                    "Remote closed session {}: {}",
                    inner.id,
                    reason.as_deref().unwrap_or("no reason given")
                );
                inner.finish(SessionState::Closed, true).await;
                return;
            }
            RemoteEvent::Error(e) => {
                error!("Session {} transport error: {}", inner.id, e);
                let kind = e.kind().unwrap_or(ErrorKind::Network);
                inner.finish(SessionState::Failed(kind), true).await;
                return;
            }
        }
    }

    inner.finish(SessionState::Closed, true).await;
}
