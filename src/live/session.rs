//! # Live Audio Session Manager
//!
//! Coordinates one duplex voice conversation at a time:
//! microphone capture → encode → send, and receive → decode → scheduled playback.
//!
//! ## Session Lifecycle:
//! 1. **Closed**: No session. `open_session` / `toggle_session` start one
//! 2. **Opening**: Microphone acquired, waiting for the endpoint to acknowledge
//! 3. **Open**: Audio flows in both directions
//! 4. **Closing**: Tearing down (endpoint close, playback stop, microphone release)
//!
//! Failures while Opening, and endpoint errors or closes from any other state,
//! go straight back to **Closed**. Interruptions never change the state.
//!
//! ## Ownership:
//! The manager exclusively owns the device, the endpoint session handle, the
//! microphone handle, the playback cursor and the active source set. All of its
//! methods are called from one cooperative task, so none of this state needs a
//! lock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::codec::{decode_frame, encode_capture, EncodedFrame};
use crate::audio::device::{AudioDevice, CaptureStream};
use crate::audio::playback::{ActiveSourceSet, PlaybackCursor, SourceId};
use crate::error::LiveError;
use crate::live::endpoint::{ConversationEndpoint, EndpointEvents, EndpointSession, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for the current (or most recently closed) session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub frames_muted: u64,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub interruptions: u64,
}

/// Where an inbound frame was placed on the device clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPlayback {
    pub source_id: SourceId,
    pub start_at: Duration,
    pub duration: Duration,
}

/// What a toggle ended up doing.
pub enum ToggleOutcome {
    /// A session was opened; the driver must poll these events
    Opened(EndpointEvents),
    Closed,
    /// A transition was already in flight
    Ignored(SessionState),
}

pub struct LiveSessionManager<D: AudioDevice, E: ConversationEndpoint> {
    device: D,
    endpoint: E,
    config: SessionConfig,
    state: SessionState,
    muted: bool,
    remote: Option<Box<dyn EndpointSession>>,
    capture: Option<Box<dyn CaptureStream>>,
    cursor: PlaybackCursor,
    active: ActiveSourceSet,
    stats: SessionStats,
}

impl<D: AudioDevice, E: ConversationEndpoint> LiveSessionManager<D, E> {
    pub fn new(device: D, endpoint: E, config: SessionConfig) -> Self {
        let cursor = PlaybackCursor::new(device.now());
        Self {
            device,
            endpoint,
            config,
            state: SessionState::Closed,
            muted: false,
            remote: None,
            capture: None,
            cursor,
            active: ActiveSourceSet::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn cursor(&self) -> Duration {
        self.cursor.position()
    }

    #[cfg(test)]
    pub fn active_sources(&self) -> usize {
        self.active.len()
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Replace the configuration used by the next `open_session`.
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Live session state changed");
            self.state = next;
        }
    }

    /// Open when closed, close when open.
    ///
    /// `&mut self` serializes toggles, so the driver only ever sees Closed or
    /// Open here. Opening outlives a call only when an open future is dropped
    /// mid-handshake; a toggle in that state is ignored rather than starting a
    /// second session, and `close_session` still cleans it up.
    pub async fn toggle_session(&mut self) -> Result<ToggleOutcome, LiveError> {
        match self.state {
            SessionState::Closed => self.open_session().await.map(ToggleOutcome::Opened),
            SessionState::Open => {
                self.close_session();
                Ok(ToggleOutcome::Closed)
            }
            state @ (SessionState::Opening | SessionState::Closing) => {
                debug!(state = %state, "Ignoring toggle during transition");
                Ok(ToggleOutcome::Ignored(state))
            }
        }
    }

    /// Acquire the microphone and open the endpoint session.
    ///
    /// On any failure the microphone is released and the state is back to
    /// `Closed` before the error is returned.
    pub async fn open_session(&mut self) -> Result<EndpointEvents, LiveError> {
        if self.state != SessionState::Closed {
            return Err(LiveError::SessionActive(self.state.to_string()));
        }

        self.transition(SessionState::Opening);

        let mut capture = match self.device.request_capture() {
            Ok(capture) => capture,
            Err(err) => {
                warn!(error = %err, "Microphone unavailable, live session not opened");
                self.transition(SessionState::Closed);
                return Err(err);
            }
        };

        match self.endpoint.open(&self.config).await {
            Ok(connection) => {
                info!(
                    model = %self.config.model,
                    voice = %self.config.voice_name,
                    capture_rate = capture.sample_rate(),
                    block_size = capture.block_size(),
                    "Live session open"
                );
                // blocks only flow once the endpoint has acknowledged
                capture.start();
                self.capture = Some(capture);
                self.remote = Some(connection.session);
                self.muted = false;
                self.stats = SessionStats::default();
                self.cursor.reset(self.device.now());
                self.transition(SessionState::Open);
                Ok(connection.events)
            }
            Err(err) => {
                warn!(error = %err, "Endpoint rejected live session");
                drop(capture);
                self.transition(SessionState::Closed);
                Err(match err {
                    err @ LiveError::Connection(_) => err,
                    other => LiveError::Connection(other.to_string()),
                })
            }
        }
    }

    /// Handle one microphone block. Never waits on the network.
    pub fn on_capture_frame(&mut self, samples: &[f32]) {
        if self.state != SessionState::Open {
            return;
        }

        self.stats.frames_captured += 1;
        if self.muted {
            self.stats.frames_muted += 1;
            return;
        }

        let frame = encode_capture(samples);
        if let Some(remote) = self.remote.as_mut() {
            match remote.send(frame) {
                Ok(()) => self.stats.frames_sent += 1,
                Err(err) => warn!(error = %err, "Failed to queue capture frame"),
            }
        }
    }

    /// Decode a synthesized frame and schedule it right after the previous one.
    ///
    /// A malformed frame is dropped and counted; the session stays open.
    pub fn on_remote_frame(&mut self, frame: &EncodedFrame) -> Result<ScheduledPlayback, LiveError> {
        if self.state != SessionState::Open {
            return Err(LiveError::NotOpen);
        }

        self.stats.frames_received += 1;
        let decoded = match decode_frame(frame, self.config.output_sample_rate, self.config.channels) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.stats.decode_errors += 1;
                warn!(error = %err, mime_type = %frame.mime_type, "Dropping malformed audio frame");
                return Err(err);
            }
        };

        let duration = decoded.duration();
        let start_at = self.cursor.schedule(self.device.now(), duration);
        let source_id = self.device.schedule(&decoded, start_at);
        self.active.insert(source_id);

        debug!(
            source = %source_id,
            start_ms = start_at.as_millis() as u64,
            duration_ms = duration.as_millis() as u64,
            "Scheduled playback"
        );

        Ok(ScheduledPlayback {
            source_id,
            start_at,
            duration,
        })
    }

    /// Completion notification from the device.
    pub fn on_playback_finished(&mut self, source: SourceId) {
        if !self.active.remove(source) {
            debug!(source = %source, "Finished source was not active");
        }
    }

    /// The user started talking over playback: silence everything and
    /// restart scheduling from the current device time.
    pub fn on_remote_interrupt(&mut self) {
        if self.state != SessionState::Open {
            return;
        }

        self.stats.interruptions += 1;
        let stopped = self.stop_playback();
        self.cursor.reset(self.device.now());
        info!(stopped, "Playback interrupted by user speech");
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            debug!(muted, "Microphone transmission toggled");
        }
        self.muted = muted;
    }

    /// Close the session. Returns false when it was already closed.
    pub fn close_session(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }

        self.transition(SessionState::Closing);
        self.teardown();
        self.transition(SessionState::Closed);
        info!(stats = ?self.stats, "Live session closed");
        true
    }

    /// Mid-session endpoint fault. Collapses into an implicit close; no reconnect.
    pub fn on_endpoint_error(&mut self, reason: &str) -> Option<LiveError> {
        if self.state == SessionState::Closed {
            return None;
        }

        warn!(reason, "Live endpoint failed, closing session");
        self.teardown();
        self.transition(SessionState::Closed);
        Some(LiveError::TransientEndpoint(reason.to_string()))
    }

    /// The remote side closed the session. Returns false when it was already closed.
    pub fn on_endpoint_closed(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }

        info!("Live endpoint closed the session");
        self.teardown();
        self.transition(SessionState::Closed);
        true
    }

    fn stop_playback(&mut self) -> usize {
        let sources = self.active.drain();
        self.device.stop(&sources);
        sources.len()
    }

    fn teardown(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            remote.close();
        }
        self.stop_playback();
        // dropping the handle releases the microphone
        self.capture = None;
    }
}

impl<D: AudioDevice, E: ConversationEndpoint> Drop for LiveSessionManager<D, E> {
    fn drop(&mut self) {
        self.close_session();
    }
}
