//! # Audio Module
//!
//! Everything that touches samples for a live voice session.
//!
//! ## Key Components:
//! - **Codec**: 16-bit PCM + base64 framing for the endpoint wire format
//! - **Playback**: Playback cursor and the set of scheduled sources
//! - **Device**: The Audio I/O Device seam and its WebSocket-client implementation
//!
//! ## Audio Format Requirements:
//! - **Input**: 16kHz, mono, sent as 16-bit little-endian PCM
//! - **Output**: 24kHz, mono, received as 16-bit little-endian PCM
//! - **Transport**: base64 text framing

pub mod codec;     // PCM encode/decode and base64 framing
pub mod device;    // Audio I/O device trait and client-backed device
pub mod playback;  // Playback cursor and active source bookkeeping

/// Sample rate of microphone audio sent to the endpoint.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized speech received from the endpoint.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Both directions are mono.
pub const CHANNELS: u16 = 1;
