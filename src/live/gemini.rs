//! # Gemini Live Endpoint
//!
//! [`ConversationEndpoint`] backed by the Gemini Live bidirectional streaming
//! API over a WebSocket.
//!
//! ## Wire Protocol:
//! 1. Client sends a `setup` message (model, voice, system instruction, AUDIO modality)
//! 2. Server answers `setupComplete`; only then is the session considered open
//! 3. Client streams `realtimeInput.mediaChunks` (16kHz PCM, base64)
//! 4. Server streams `serverContent` with `modelTurn` audio parts, `interrupted`
//!    and `turnComplete` flags
//!
//! After the handshake the socket is split: a writer task drains outgoing
//! frames in order, a reader task turns server messages into [`EndpointEvent`]s.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::audio::codec::EncodedFrame;
use crate::config::AppConfig;
use crate::error::LiveError;
use crate::live::endpoint::{
    ConversationEndpoint, EndpointConnection, EndpointEvent, EndpointSession, SessionConfig,
};

type LiveSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GeminiLiveEndpoint {
    endpoint_url: String,
    api_key: Option<String>,
    open_timeout: Duration,
}

impl GeminiLiveEndpoint {
    pub fn new(endpoint_url: String, api_key: Option<String>, open_timeout: Duration) -> Self {
        Self {
            endpoint_url,
            api_key,
            open_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.live.endpoint_url.clone(),
            config.live.api_key.clone(),
            config.open_timeout(),
        )
    }

    /// Full connection URL. Contains the API key, never log it.
    fn build_url(&self) -> Result<String, LiveError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LiveError::Connection("no API key configured for the live endpoint".to_string()))?;

        let separator = if self.endpoint_url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}key={}", self.endpoint_url, separator, key))
    }
}

#[async_trait]
impl ConversationEndpoint for GeminiLiveEndpoint {
    async fn open(&self, config: &SessionConfig) -> Result<EndpointConnection, LiveError> {
        let url = self.build_url()?;
        info!(endpoint = %self.endpoint_url, model = %config.model, "Opening live endpoint session");

        let socket = match tokio::time::timeout(self.open_timeout, handshake(&url, config)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(LiveError::Connection(format!(
                    "endpoint did not acknowledge setup within {}ms",
                    self.open_timeout.as_millis()
                )))
            }
        };

        let (sink, stream) = socket.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, outgoing_rx, event_tx.clone()));
        tokio::spawn(read_loop(stream, event_tx));

        Ok(EndpointConnection {
            session: Box::new(GeminiLiveSession {
                outgoing: outgoing_tx,
                closed: false,
            }),
            events: event_rx,
        })
    }
}

enum Outgoing {
    Audio(EncodedFrame),
    Close,
}

struct GeminiLiveSession {
    outgoing: UnboundedSender<Outgoing>,
    closed: bool,
}

impl EndpointSession for GeminiLiveSession {
    fn send(&mut self, frame: EncodedFrame) -> Result<(), LiveError> {
        if self.closed {
            return Err(LiveError::NotOpen);
        }
        self.outgoing
            .send(Outgoing::Audio(frame))
            .map_err(|_| LiveError::TransientEndpoint("endpoint writer has stopped".to_string()))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.outgoing.send(Outgoing::Close);
        }
    }
}

async fn handshake(url: &str, config: &SessionConfig) -> Result<LiveSocket, LiveError> {
    let (mut socket, _) = connect_async(url)
        .await
        .map_err(|e| LiveError::Connection(e.to_string()))?;

    socket
        .send(Message::Text(setup_message(config).to_string()))
        .await
        .map_err(|e| LiveError::Connection(e.to_string()))?;

    while let Some(message) = socket.next().await {
        let message = message.map_err(|e| LiveError::Connection(e.to_string()))?;
        match message {
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "no reason given".to_string());
                return Err(LiveError::Connection(format!("endpoint rejected setup: {}", reason)));
            }
            other => {
                if let Some(text) = message_text(other) {
                    if is_setup_complete(&text) {
                        debug!("Live endpoint acknowledged setup");
                        return Ok(socket);
                    }
                }
            }
        }
    }

    Err(LiveError::Connection(
        "endpoint closed before acknowledging setup".to_string(),
    ))
}

async fn write_loop(
    mut sink: SplitSink<LiveSocket, Message>,
    mut outgoing: UnboundedReceiver<Outgoing>,
    events: UnboundedSender<EndpointEvent>,
) {
    while let Some(item) = outgoing.recv().await {
        match item {
            Outgoing::Audio(frame) => {
                let message = Message::Text(realtime_input_message(&frame).to_string());
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "Failed to write to live endpoint");
                    let _ = events.send(EndpointEvent::Error(e.to_string()));
                    return;
                }
            }
            Outgoing::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<LiveSocket>, events: UnboundedSender<EndpointEvent>) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                let _ = events.send(EndpointEvent::Error(e.to_string()));
                return;
            }
        };

        if let Message::Close(frame) = &message {
            debug!(frame = ?frame, "Live endpoint sent close");
            let _ = events.send(EndpointEvent::Closed);
            return;
        }

        let Some(text) = message_text(message) else {
            continue;
        };

        match parse_server_message(&text) {
            Ok(parsed) => {
                for event in parsed {
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Skipping unparseable live endpoint message"),
        }
    }

    let _ = events.send(EndpointEvent::Closed);
}

/// The endpoint sends JSON in both text and binary frames.
fn message_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => String::from_utf8(bytes).ok(),
        _ => None,
    }
}

pub fn setup_message(config: &SessionConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_instruction }]
            }
        }
    })
}

pub fn realtime_input_message(frame: &EncodedFrame) -> Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": frame.mime_type, "data": frame.data }]
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerEnvelope {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    go_away: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

/// Map one server message to session events.
///
/// Audio frames come first, then the interruption flag, then turn completion.
/// Messages with nothing relevant (tool calls, transcripts) map to no events.
pub fn parse_server_message(text: &str) -> Result<Vec<EndpointEvent>, serde_json::Error> {
    let envelope: ServerEnvelope = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if let Some(content) = envelope.server_content {
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for inline in parts.into_iter().filter_map(|part| part.inline_data) {
            if inline.mime_type.is_empty() || inline.mime_type.starts_with("audio/") {
                events.push(EndpointEvent::Frame(EncodedFrame::new(inline.mime_type, inline.data)));
            }
        }
        if content.interrupted {
            events.push(EndpointEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(EndpointEvent::TurnComplete);
        }
    }

    if let Some(notice) = envelope.go_away {
        info!(notice = %notice, "Live endpoint announced disconnect");
    }

    Ok(events)
}

pub fn is_setup_complete(text: &str) -> bool {
    serde_json::from_str::<ServerEnvelope>(text)
        .map(|envelope| envelope.setup_complete.is_some())
        .unwrap_or(false)
}
