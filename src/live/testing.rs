//! Deterministic doubles for the audio device and the conversational endpoint.
//!
//! Both are cheap `Clone` handles over shared state so a test can keep one
//! copy for assertions while the manager owns the other.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Notify;

use crate::audio::codec::{pcm_mime_type, DecodedFrame, EncodedFrame};
use crate::audio::device::{AudioDevice, CaptureStream};
use crate::audio::playback::SourceId;
use crate::audio::OUTPUT_SAMPLE_RATE;
use crate::error::LiveError;
use crate::live::endpoint::{
    ConversationEndpoint, EndpointConnection, EndpointEvent, EndpointSession, SessionConfig,
};

/// A silent 24kHz mono PCM frame lasting `millis`.
pub fn pcm_frame_ms(millis: u64) -> EncodedFrame {
    let samples = (OUTPUT_SAMPLE_RATE as u64 * millis / 1000) as usize;
    EncodedFrame::new(pcm_mime_type(OUTPUT_SAMPLE_RATE), STANDARD.encode(vec![0u8; samples * 2]))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct DeviceState {
    now: Duration,
    denied: bool,
    next_source: u64,
    scheduled: Vec<(SourceId, Duration, Duration)>,
    stopped: Vec<SourceId>,
    captures_acquired: usize,
    captures_started: usize,
    captures_held: usize,
}

#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_microphone(&self) {
        lock(&self.state).denied = true;
    }

    pub fn set_now(&self, now: Duration) {
        lock(&self.state).now = now;
    }

    pub fn advance(&self, by: Duration) {
        lock(&self.state).now += by;
    }

    /// `(source, start_at, duration)` for every scheduled buffer, in order.
    pub fn scheduled(&self) -> Vec<(SourceId, Duration, Duration)> {
        lock(&self.state).scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        lock(&self.state).stopped.clone()
    }

    pub fn captures_acquired(&self) -> usize {
        lock(&self.state).captures_acquired
    }

    pub fn captures_started(&self) -> usize {
        lock(&self.state).captures_started
    }

    pub fn captures_held(&self) -> usize {
        lock(&self.state).captures_held
    }
}

impl AudioDevice for FakeDevice {
    fn request_capture(&mut self) -> Result<Box<dyn CaptureStream>, LiveError> {
        let mut state = lock(&self.state);
        if state.denied {
            return Err(LiveError::PermissionDenied("denied by test".to_string()));
        }
        state.captures_acquired += 1;
        state.captures_held += 1;
        Ok(Box::new(FakeCapture {
            state: self.state.clone(),
        }))
    }

    fn now(&self) -> Duration {
        lock(&self.state).now
    }

    fn schedule(&mut self, frame: &DecodedFrame, start_at: Duration) -> SourceId {
        let mut state = lock(&self.state);
        state.next_source += 1;
        let source = SourceId(state.next_source);
        state.scheduled.push((source, start_at, frame.duration()));
        source
    }

    fn stop(&mut self, sources: &[SourceId]) {
        lock(&self.state).stopped.extend_from_slice(sources);
    }
}

struct FakeCapture {
    state: Arc<Mutex<DeviceState>>,
}

impl CaptureStream for FakeCapture {
    fn start(&mut self) {
        lock(&self.state).captures_started += 1;
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn block_size(&self) -> usize {
        4096
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        lock(&self.state).captures_held -= 1;
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    fail_next: Option<String>,
    opened: Vec<SessionConfig>,
    sent: Vec<EncodedFrame>,
    close_calls: usize,
    events: Option<UnboundedSender<EndpointEvent>>,
    ack_gate: Option<Arc<Notify>>,
}

#[derive(Clone, Default)]
pub struct FakeEndpoint {
    state: Arc<Mutex<EndpointState>>,
}

impl FakeEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with a connection error.
    pub fn fail_next_open(&self, reason: &str) {
        lock(&self.state).fail_next = Some(reason.to_string());
    }

    /// Hold every `open` until the returned gate is notified, like an
    /// endpoint that is slow to acknowledge the setup.
    pub fn hold_acknowledgement(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.state).ack_gate = Some(gate.clone());
        gate
    }

    pub fn opened_configs(&self) -> Vec<SessionConfig> {
        lock(&self.state).opened.clone()
    }

    pub fn sent_frames(&self) -> Vec<EncodedFrame> {
        lock(&self.state).sent.clone()
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    /// Deliver an event on the most recently opened session.
    pub fn emit(&self, event: EndpointEvent) -> bool {
        match lock(&self.state).events.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Drop the event sender, as if the transport went away.
    pub fn disconnect(&self) {
        lock(&self.state).events = None;
    }
}

#[async_trait]
impl ConversationEndpoint for FakeEndpoint {
    async fn open(&self, config: &SessionConfig) -> Result<EndpointConnection, LiveError> {
        let gate = lock(&self.state).ack_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = lock(&self.state);
        if let Some(reason) = state.fail_next.take() {
            return Err(LiveError::Connection(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.opened.push(config.clone());
        state.events = Some(tx);

        Ok(EndpointConnection {
            session: Box::new(FakeSession {
                state: self.state.clone(),
                closed: false,
            }),
            events: rx,
        })
    }
}

struct FakeSession {
    state: Arc<Mutex<EndpointState>>,
    closed: bool,
}

impl EndpointSession for FakeSession {
    fn send(&mut self, frame: EncodedFrame) -> Result<(), LiveError> {
        if self.closed {
            return Err(LiveError::NotOpen);
        }
        lock(&self.state).sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.state).close_calls += 1;
        }
    }
}
