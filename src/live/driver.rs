//! # Live Session Driver
//!
//! One tokio task per live WebSocket connection. The task owns the
//! [`LiveSessionManager`] and handles one input at a time, either a command
//! from the socket actor or an event from the endpoint, so the manager's
//! state never needs a lock.
//!
//! ## Inputs:
//! - **Commands**: toggles, mute, capture blocks and playback completions
//!   forwarded by the WebSocket actor
//! - **Endpoint events**: synthesized audio, interruptions, faults and closes
//!   from the currently open session
//!
//! ## Outputs:
//! - `session_status` / `error` messages to the client after each step
//! - Session counters folded into the shared [`AppState`] metrics

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::device::ClientAudioDevice;
use crate::audio::playback::SourceId;
use crate::error::LiveError;
use crate::live::endpoint::{ConversationEndpoint, EndpointEvent, EndpointEvents};
use crate::live::session::{LiveSessionManager, SessionState, ToggleOutcome};
use crate::protocol::ServerMessage;
use crate::state::AppState;

/// Requests from the WebSocket actor.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveCommand {
    Toggle { microphone_granted: bool },
    SetMuted(bool),
    /// One capture block of 16kHz mono samples
    Capture(Vec<f32>),
    PlaybackEnded(SourceId),
    Close,
    /// The socket is gone: tear down and exit
    Shutdown,
}

pub struct LiveDriver<E: ConversationEndpoint> {
    connection_id: Uuid,
    manager: LiveSessionManager<ClientAudioDevice, E>,
    events: Option<EndpointEvents>,
    outbound: UnboundedSender<ServerMessage>,
    state: AppState,
}

impl<E: ConversationEndpoint + 'static> LiveDriver<E> {
    pub fn new(
        connection_id: Uuid,
        endpoint: E,
        state: AppState,
        outbound: UnboundedSender<ServerMessage>,
    ) -> Self {
        let config = state.get_config();
        let device = ClientAudioDevice::new(outbound.clone(), config.live.capture_block_size);
        let manager = LiveSessionManager::new(device, endpoint, config.session_config());

        Self {
            connection_id,
            manager,
            events: None,
            outbound,
            state,
        }
    }

    /// Run the driver on its own task and return the command sender.
    pub fn spawn(self) -> UnboundedSender<LiveCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        tx
    }

    pub async fn run(mut self, mut commands: UnboundedReceiver<LiveCommand>) {
        debug!(connection = %self.connection_id, "Live driver started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(LiveCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = next_event(&mut self.events) => self.handle_event(event),
            }
        }

        if self.manager.close_session() {
            self.finish_session();
        }
        debug!(connection = %self.connection_id, "Live driver stopped");
    }

    async fn handle_command(&mut self, command: LiveCommand) {
        match command {
            LiveCommand::Toggle { microphone_granted } => self.toggle(microphone_granted).await,
            LiveCommand::SetMuted(muted) => {
                self.manager.set_muted(muted);
                self.report_status(None);
            }
            LiveCommand::Capture(samples) => self.manager.on_capture_frame(&samples),
            LiveCommand::PlaybackEnded(source) => self.manager.on_playback_finished(source),
            LiveCommand::Close => {
                if self.manager.close_session() {
                    self.finish_session();
                }
                self.report_status(None);
            }
            LiveCommand::Shutdown => {}
        }
    }

    async fn toggle(&mut self, microphone_granted: bool) {
        self.manager.device_mut().set_microphone_permission(microphone_granted);
        if self.manager.state() == SessionState::Closed {
            // pick up config changes made since the last session
            self.manager.set_config(self.state.get_config().session_config());
        }

        match self.manager.toggle_session().await {
            Ok(ToggleOutcome::Opened(events)) => {
                info!(connection = %self.connection_id, "Live session opened");
                self.events = Some(events);
                self.state.record_session_opened();
                self.report_status(None);
            }
            Ok(ToggleOutcome::Closed) => {
                self.finish_session();
                self.report_status(None);
            }
            Ok(ToggleOutcome::Ignored(state)) => {
                self.report_status(Some(format!("session is {}, toggle ignored", state)));
            }
            Err(err) => {
                warn!(connection = %self.connection_id, error = %err, "Live session failed to open");
                self.state.record_session_failed();
                self.report_error(&err);
                self.report_status(Some(err.to_string()));
            }
        }
    }

    fn handle_event(&mut self, event: EndpointEvent) {
        match event {
            EndpointEvent::Frame(frame) => match self.manager.on_remote_frame(&frame) {
                Ok(_) => {}
                Err(LiveError::NotOpen) => debug!("Dropping audio frame that arrived after close"),
                Err(err) => self.report_error(&err),
            },
            EndpointEvent::Interrupted => self.manager.on_remote_interrupt(),
            EndpointEvent::TurnComplete => debug!(connection = %self.connection_id, "Model turn complete"),
            EndpointEvent::Error(reason) => {
                if let Some(err) = self.manager.on_endpoint_error(&reason) {
                    self.finish_session();
                    self.report_error(&err);
                    self.report_status(Some(err.to_string()));
                }
                self.events = None;
            }
            EndpointEvent::Closed => {
                if self.manager.on_endpoint_closed() {
                    self.finish_session();
                    self.report_status(Some("the endpoint closed the session".to_string()));
                }
                self.events = None;
            }
        }
    }

    /// Bookkeeping after any transition from an open session to Closed.
    fn finish_session(&mut self) {
        self.events = None;
        self.state.record_session_closed(self.manager.stats());
    }

    fn report_status(&self, message: Option<String>) {
        self.send(ServerMessage::SessionStatus {
            state: self.manager.state(),
            muted: self.manager.is_muted(),
            message,
        });
    }

    fn report_error(&self, err: &LiveError) {
        self.send(ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            debug!(connection = %self.connection_id, "Client channel closed");
        }
    }
}

/// Next event of the open session; never resolves while no session is open.
async fn next_event(events: &mut Option<EndpointEvents>) -> EndpointEvent {
    match events {
        Some(rx) => rx.recv().await.unwrap_or(EndpointEvent::Closed),
        None => std::future::pending().await,
    }
}
