//! # Streaming Conversational Endpoint
//!
//! The remote side of a live voice session. Opening a session yields two
//! halves:
//!
//! - an [`EndpointSession`] used to push encoded microphone frames and to
//!   close the connection, and
//! - a receiver of [`EndpointEvent`]s (synthesized audio, interruptions,
//!   errors, close) that the session driver feeds back into the manager.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::audio::codec::EncodedFrame;
use crate::audio::{CHANNELS, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::error::LiveError;

/// Parameters negotiated when a session is opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
}

impl SessionConfig {
    /// Fixed formats: 16kHz mono in, 24kHz mono out.
    pub fn new(model: String, voice_name: String, system_instruction: String) -> Self {
        Self {
            model,
            voice_name,
            system_instruction,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            channels: CHANNELS,
        }
    }
}

/// Something the endpoint reported during an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// Synthesized speech audio
    Frame(EncodedFrame),
    /// The user started talking over playback
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// Mid-session fault (network drop, protocol error)
    Error(String),
    /// The remote side closed the session
    Closed,
}

pub type EndpointEvents = UnboundedReceiver<EndpointEvent>;

/// The live half of an opened session.
pub trait EndpointSession: Send {
    /// Queue a frame for transmission without waiting on the network.
    ///
    /// Frames are written in the order this method is called.
    fn send(&mut self, frame: EncodedFrame) -> Result<(), LiveError>;

    /// Ask the remote side to close. Safe to call more than once.
    fn close(&mut self);
}

/// A session that the endpoint has acknowledged.
pub struct EndpointConnection {
    pub session: Box<dyn EndpointSession>,
    pub events: EndpointEvents,
}

#[async_trait]
pub trait ConversationEndpoint: Send + Sync {
    /// Open a duplex session. Resolves only once the remote side has
    /// acknowledged the configuration; fails with `LiveError::Connection`
    /// when it is unreachable or rejects it.
    async fn open(&self, config: &SessionConfig) -> Result<EndpointConnection, LiveError>;
}
