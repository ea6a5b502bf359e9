//! # Live WebSocket Protocol
//!
//! JSON messages exchanged with the browser client on `/ws/live`.
//! Binary messages are not described here: client → server binary frames are
//! raw capture blocks (little-endian `f32`, 16kHz mono).
//!
//! ## Message Flow:
//! 1. Client sends `toggle_session` with its microphone permission
//! 2. Server answers `capture_started` and `session_status` (`open`)
//! 3. Client streams binary capture blocks
//! 4. Server sends `play` for each synthesized frame, `stop` on interruption
//! 5. Client reports `playback_ended` when a buffer finishes naturally

use serde::{Deserialize, Serialize};

use crate::audio::playback::SourceId;
use crate::live::session::SessionState;

/// Messages the client sends as text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open the session when closed, close it when open
    ToggleSession {
        /// Result of the browser's microphone permission prompt
        microphone_granted: bool,
    },

    /// Suppress or resume transmission of captured audio
    SetMuted { muted: bool },

    /// A scheduled buffer finished playing on its own
    PlaybackEnded { source_id: SourceId },

    /// Close the session explicitly
    CloseSession,

    /// Client-initiated heartbeat
    Ping { timestamp: u64 },

    /// Answer to a server heartbeat
    Pong { timestamp: u64 },
}

/// Messages the server sends as text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session state after a change
    SessionStatus {
        state: SessionState,
        muted: bool,
        message: Option<String>,
    },

    /// The client should start delivering microphone blocks
    CaptureStarted { sample_rate: u32, block_size: usize },

    /// The client should release the microphone
    CaptureStopped,

    /// Play a decoded buffer at a time on the device clock
    Play {
        source_id: SourceId,
        /// Milliseconds since the socket connected
        start_at_ms: f64,
        duration_ms: f64,
        sample_rate: u32,
        channels: usize,
        /// Base64 of interleaved little-endian f32 samples
        audio: String,
    },

    /// Stop these buffers immediately
    Stop { source_ids: Vec<SourceId> },

    Error { code: String, message: String },

    Ping { timestamp: u64 },

    Pong { timestamp: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"toggle_session","microphone_granted":true}"#).unwrap();
        assert_eq!(msg, ClientMessage::ToggleSession { microphone_granted: true });

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"playback_ended","source_id":7}"#).unwrap();
        assert_eq!(msg, ClientMessage::PlaybackEnded { source_id: SourceId(7) });

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"close_session"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CloseSession);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let json = serde_json::to_value(ServerMessage::SessionStatus {
            state: SessionState::Open,
            muted: false,
            message: None,
        })
        .unwrap();
        assert_eq!(json["type"], "session_status");
        assert_eq!(json["state"], "open");

        let json = serde_json::to_value(ServerMessage::Stop {
            source_ids: vec![SourceId(1), SourceId(2)],
        })
        .unwrap();
        assert_eq!(json["source_ids"], serde_json::json!([1, 2]));
    }
}
