//! # Live Voice WebSocket Handler
//!
//! Browser clients connect to `/ws/live`. Each connection gets:
//! - a [`LiveSocket`] actor that owns the socket, the heartbeat, and the
//!   translation between wire messages and driver commands
//! - a [`LiveDriver`] task that owns the live session itself
//!
//! The two talk over unbounded channels: commands flow actor → driver,
//! [`ServerMessage`]s flow driver → actor and are written to the socket in
//! the order they were produced.
//!
//! ## Message Format:
//! - **Client → Server**: JSON control messages, binary capture blocks
//!   (little-endian f32, 16kHz mono)
//! - **Server → Client**: JSON messages (see `protocol`)

use crate::audio::codec::read_f32_samples;
use crate::error::AppError;
use crate::live::driver::{LiveCommand, LiveDriver};
use crate::live::gemini::GeminiLiveEndpoint;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket actor for one live voice connection.
pub struct LiveSocket {
    connection_id: Uuid,

    /// Command channel into the session driver
    commands: UnboundedSender<LiveCommand>,

    /// Messages from the driver, attached as a stream when the actor starts
    outbound: Option<UnboundedReceiver<ServerMessage>>,

    state: AppState,

    heartbeat_interval: Duration,

    client_timeout: Duration,

    /// Last time the client proved it was alive
    last_heartbeat: Instant,
}

impl LiveSocket {
    pub fn new(
        connection_id: Uuid,
        state: AppState,
        commands: UnboundedSender<LiveCommand>,
        outbound: UnboundedReceiver<ServerMessage>,
    ) -> Self {
        let config = state.get_config();
        Self {
            connection_id,
            commands,
            outbound: Some(outbound),
            state,
            heartbeat_interval: Duration::from_secs(config.performance.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.performance.client_timeout_secs),
            last_heartbeat: Instant::now(),
        }
    }

    fn forward(&self, command: LiveCommand) {
        if self.commands.send(command).is_err() {
            warn!(connection = %self.connection_id, "Live driver is gone, dropping command");
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "Failed to serialize server message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        self.send_message(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err));
                return;
            }
        };

        match message {
            ClientMessage::Ping { timestamp } => {
                self.last_heartbeat = Instant::now();
                self.send_message(ctx, &ServerMessage::Pong { timestamp });
            }
            ClientMessage::Pong { .. } => {
                self.last_heartbeat = Instant::now();
            }
            other => {
                if let Some(command) = to_command(other) {
                    self.forward(command);
                }
            }
        }
    }

    fn handle_capture(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        match read_f32_samples(data) {
            Ok(samples) => self.forward(LiveCommand::Capture(samples)),
            Err(err) => self.send_error(ctx, "audio_error", &err),
        }
    }
}

/// Driver command for a client control message. Heartbeats are answered by
/// the actor itself.
fn to_command(message: ClientMessage) -> Option<LiveCommand> {
    match message {
        ClientMessage::ToggleSession { microphone_granted } => Some(LiveCommand::Toggle { microphone_granted }),
        ClientMessage::SetMuted { muted } => Some(LiveCommand::SetMuted(muted)),
        ClientMessage::PlaybackEnded { source_id } => Some(LiveCommand::PlaybackEnded(source_id)),
        ClientMessage::CloseSession => Some(LiveCommand::Close),
        ClientMessage::Ping { .. } | ClientMessage::Pong { .. } => None,
    }
}

impl Actor for LiveSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, "Live WebSocket connection started");

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection = %act.connection_id, "Live WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            let ping = ServerMessage::Ping {
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
            };
            act.send_message(ctx, &ping);
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, "Live WebSocket connection stopped");
        // the driver closes the session (microphone, playback, endpoint) on shutdown
        let _ = self.commands.send(LiveCommand::Shutdown);
        self.state.release_connection();
    }
}

/// Messages produced by the driver and the client audio device.
impl StreamHandler<ServerMessage> for LiveSocket {
    fn handle(&mut self, message: ServerMessage, ctx: &mut Self::Context) {
        self.send_message(ctx, &message);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(connection = %self.connection_id, "Live driver output ended");
        ctx.stop();
    }
}

/// Handle incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Binary(data)) => self.handle_capture(&data, ctx),
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection = %self.connection_id, reason = ?reason, "Live WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection = %self.connection_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// Admits the connection (503 when the server is at capacity), starts the
/// session driver, and upgrades the request.
pub async fn live_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let state = app_state.get_ref().clone();
    if !state.try_acquire_connection() {
        let limit = state.get_config().performance.max_concurrent_sessions;
        warn!(limit, "Rejecting live connection, server at capacity");
        return Err(AppError::Unavailable(format!(
            "all {} live session slots are in use",
            limit
        ))
        .into());
    }

    let connection_id = Uuid::new_v4();
    info!(
        connection = %connection_id,
        peer = ?req.connection_info().peer_addr(),
        "New live WebSocket connection request"
    );

    let config = state.get_config();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let driver = LiveDriver::new(
        connection_id,
        GeminiLiveEndpoint::from_config(&config),
        state.clone(),
        outbound_tx,
    );
    let commands = driver.spawn();

    let socket = LiveSocket::new(connection_id, state.clone(), commands, outbound_rx);
    ws::start(socket, &req, stream).map_err(|err| {
        // the actor never started, so `stopped` will not release the slot
        state.release_connection();
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::SourceId;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test as actix_test, App};

    #[test]
    fn test_client_messages_map_to_commands() {
        assert_eq!(
            to_command(ClientMessage::ToggleSession { microphone_granted: true }),
            Some(LiveCommand::Toggle { microphone_granted: true })
        );
        assert_eq!(
            to_command(ClientMessage::SetMuted { muted: true }),
            Some(LiveCommand::SetMuted(true))
        );
        assert_eq!(
            to_command(ClientMessage::PlaybackEnded { source_id: SourceId(4) }),
            Some(LiveCommand::PlaybackEnded(SourceId(4)))
        );
        assert_eq!(to_command(ClientMessage::CloseSession), Some(LiveCommand::Close));
        assert_eq!(to_command(ClientMessage::Pong { timestamp: 1 }), None);
    }

    #[actix_web::test]
    async fn test_connection_rejected_at_capacity() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = AppState::new(config);
        assert!(state.try_acquire_connection());

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/live", web::get().to(live_websocket)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/ws/live").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().connections_rejected, 1);
    }

    #[actix_web::test]
    async fn test_failed_upgrade_releases_slot() {
        let state = AppState::new(AppConfig::default());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/live", web::get().to(live_websocket)),
        )
        .await;

        // a plain GET without upgrade headers is not a WebSocket handshake
        let req = actix_test::TestRequest::get().uri("/ws/live").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_metrics_snapshot().connections, 0);
    }
}
