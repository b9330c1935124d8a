// Fake devices and transport for driving sessions without hardware or network

#![allow(dead_code)]

use natiq_live::audio::{
    CaptureBackend, ManualClock, OutputClock, PlaybackScheduler, RenderBackend, SampleBlock, SpectrumTap,
};
use natiq_live::error::{ErrorKind, PipelineError, Result};
use natiq_live::remote::{Credential, LinkEnds, LiveTransport, RemoteEvent, RemoteLink};
use natiq_live::session::{PersonaConfig, SessionParts};
use natiq_live::AudioFrame;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// What the fakes observed
#[derive(Default)]
pub struct Recorder {
    pub capture_started: AtomicBool,
    pub capture_stopped: AtomicBool,
    pub render_started: AtomicBool,
    pub render_stopped: AtomicBool,
    pub opens: AtomicUsize,
    blocks: Mutex<Option<mpsc::Sender<SampleBlock>>>,
    remote: Mutex<Option<LinkEnds>>,
    scheduler: Mutex<Option<Arc<PlaybackScheduler>>>,
}

impl Recorder {
    /// Feed one block as if the microphone captured it
    pub async fn capture(&self, block: SampleBlock) {
        let tx = self.blocks.lock().unwrap().clone().expect("capture not started");
        tx.send(block).await.expect("uplink gone");
    }

    /// Deliver an event as if the remote sent it
    pub async fn remote_event(&self, event: RemoteEvent) {
        let tx = self
            .remote
            .lock()
            .unwrap()
            .as_ref()
            .map(|ends| ends.events.clone())
            .expect("remote not open");
        tx.send(event).await.expect("downlink gone");
    }

    /// Next frame the session transmitted
    pub async fn next_frame(&self) -> Option<AudioFrame> {
        let mut ends = self.remote.lock().unwrap().take().expect("remote not open");
        let frame = tokio::time::timeout(Duration::from_secs(2), ends.frames.recv())
            .await
            .ok()
            .flatten();
        *self.remote.lock().unwrap() = Some(ends);
        frame
    }

    /// Frames already queued for transmission
    pub fn queued_frames(&self) -> Vec<AudioFrame> {
        let mut guard = self.remote.lock().unwrap();
        let ends = guard.as_mut().expect("remote not open");
        let mut frames = Vec::new();
        while let Ok(frame) = ends.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn scheduler(&self) -> Arc<PlaybackScheduler> {
        self.scheduler.lock().unwrap().clone().expect("render not started")
    }
}

pub struct FakeCapture {
    recorder: Arc<Recorder>,
    fail: bool,
    running: bool,
}

#[async_trait::async_trait]
impl CaptureBackend for FakeCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>> {
        if self.fail {
            return Err(PipelineError::Device("permission denied".to_string()));
        }
        let (tx, rx) = mpsc::channel(8);
        *self.recorder.blocks.lock().unwrap() = Some(tx);
        self.recorder.capture_started.store(true, Ordering::SeqCst);
        self.running = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.recorder.blocks.lock().unwrap().take();
        self.recorder.capture_stopped.store(true, Ordering::SeqCst);
        self.running = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running
    }

    fn name(&self) -> &str {
        "fake capture"
    }
}

pub struct FakeRender {
    recorder: Arc<Recorder>,
    clock: Arc<ManualClock>,
    fail: bool,
    running: bool,
}

impl RenderBackend for FakeRender {
    fn clock(&self) -> Arc<dyn OutputClock> {
        self.clock.clone()
    }

    fn start(&mut self, scheduler: Arc<PlaybackScheduler>, _tap: Arc<SpectrumTap>) -> Result<()> {
        if self.fail {
            return Err(PipelineError::Device("no output device available".to_string()));
        }
        *self.recorder.scheduler.lock().unwrap() = Some(scheduler);
        self.recorder.render_started.store(true, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.recorder.render_stopped.store(true, Ordering::SeqCst);
        self.running = false;
        Ok(())
    }

    fn is_rendering(&self) -> bool {
        self.running
    }

    fn name(&self) -> &str {
        "fake render"
    }
}

/// How the fake remote answers `open`
#[derive(Clone, Copy)]
pub enum OpenBehavior {
    Accept,
    Reject(ErrorKind),
    /// Never completes
    Hang,
}

pub struct FakeTransport {
    recorder: Arc<Recorder>,
    behavior: OpenBehavior,
    outbound_depth: usize,
}

#[async_trait::async_trait]
impl LiveTransport for FakeTransport {
    async fn open(&self, _persona: &PersonaConfig, _credential: &Credential) -> Result<RemoteLink> {
        self.recorder.opens.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            OpenBehavior::Accept => {
                let (link, ends) = RemoteLink::channel(self.outbound_depth, 64);
                *self.recorder.remote.lock().unwrap() = Some(ends);
                Ok(link)
            }
            OpenBehavior::Reject(ErrorKind::Auth) => Err(PipelineError::Auth("API key not valid".to_string())),
            OpenBehavior::Reject(_) => Err(PipelineError::Network("connection refused".to_string())),
            OpenBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn name(&self) -> &str {
        "fake transport"
    }
}

pub fn started(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

/// Builds session parts wired to a shared recorder
pub struct Harness {
    pub recorder: Arc<Recorder>,
    pub clock: Arc<ManualClock>,
    pub capture_fails: bool,
    pub render_fails: bool,
    pub open: OpenBehavior,
    pub credential: bool,
    pub outbound_depth: usize,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            clock: Arc::new(ManualClock::new()),
            capture_fails: false,
            render_fails: false,
            open: OpenBehavior::Accept,
            credential: true,
            outbound_depth: 16,
        }
    }

    pub fn parts(&self) -> SessionParts {
        SessionParts {
            capture: Box::new(FakeCapture {
                recorder: Arc::clone(&self.recorder),
                fail: self.capture_fails,
                running: false,
            }),
            render: Box::new(FakeRender {
                recorder: Arc::clone(&self.recorder),
                clock: Arc::clone(&self.clock),
                fail: self.render_fails,
                running: false,
            }),
            transport: Arc::new(FakeTransport {
                recorder: Arc::clone(&self.recorder),
                behavior: self.open,
                outbound_depth: self.outbound_depth,
            }),
            credential: self.credential.then(|| Credential::new("test-key").unwrap()),
        }
    }
}
