//! # Audio I/O Device
//!
//! The live session manager never touches hardware directly. It talks to an
//! [`AudioDevice`], which captures microphone blocks and plays decoded buffers
//! on a monotonic clock. Tests substitute a deterministic double; the server
//! uses [`ClientAudioDevice`], which forwards everything to the browser over
//! the live WebSocket.

use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::audio::codec::{encode_f32_base64, DecodedFrame};
use crate::audio::playback::SourceId;
use crate::audio::INPUT_SAMPLE_RATE;
use crate::error::LiveError;
use crate::protocol::ServerMessage;

/// An acquired microphone. Dropping it releases the device.
///
/// Acquiring only reserves the microphone; blocks are delivered after `start`,
/// once the session is open.
pub trait CaptureStream: Send {
    fn start(&mut self);

    fn sample_rate(&self) -> u32;

    /// Samples per delivered block.
    fn block_size(&self) -> usize;
}

/// Capture and playback seam used by the live session manager.
pub trait AudioDevice: Send {
    /// Acquire the microphone, failing with `PermissionDenied` when refused.
    fn request_capture(&mut self) -> Result<Box<dyn CaptureStream>, LiveError>;

    /// Monotonic device clock.
    fn now(&self) -> Duration;

    /// Schedule a buffer to start at `start_at` on the device clock. Returns immediately.
    fn schedule(&mut self, frame: &DecodedFrame, start_at: Duration) -> SourceId;

    /// Stop the given scheduled buffers immediately. Unknown ids are ignored.
    fn stop(&mut self, sources: &[SourceId]);
}

/// Device backed by the browser on the other end of the live WebSocket.
///
/// The device clock starts at zero when the device is created (socket connect);
/// the client aligns its own audio clock to that origin.
pub struct ClientAudioDevice {
    outbound: UnboundedSender<ServerMessage>,
    epoch: Instant,
    next_source: u64,
    microphone_granted: bool,
    block_size: usize,
}

impl ClientAudioDevice {
    pub fn new(outbound: UnboundedSender<ServerMessage>, block_size: usize) -> Self {
        Self {
            outbound,
            epoch: Instant::now(),
            next_source: 1,
            microphone_granted: false,
            block_size,
        }
    }

    /// Record the client's latest microphone permission result.
    pub fn set_microphone_permission(&mut self, granted: bool) {
        self.microphone_granted = granted;
    }

    fn emit(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Client channel closed, dropping device message");
        }
    }
}

impl AudioDevice for ClientAudioDevice {
    fn request_capture(&mut self) -> Result<Box<dyn CaptureStream>, LiveError> {
        if !self.microphone_granted {
            return Err(LiveError::PermissionDenied(
                "the client did not grant microphone access".to_string(),
            ));
        }

        Ok(Box::new(ClientCapture {
            outbound: self.outbound.clone(),
            block_size: self.block_size,
            started: false,
        }))
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&mut self, frame: &DecodedFrame, start_at: Duration) -> SourceId {
        let source = SourceId(self.next_source);
        self.next_source += 1;

        self.emit(ServerMessage::Play {
            source_id: source,
            start_at_ms: start_at.as_secs_f64() * 1000.0,
            duration_ms: frame.duration().as_secs_f64() * 1000.0,
            sample_rate: frame.sample_rate,
            channels: frame.channel_count(),
            audio: encode_f32_base64(&frame.interleaved()),
        });

        source
    }

    fn stop(&mut self, sources: &[SourceId]) {
        if sources.is_empty() {
            return;
        }
        self.emit(ServerMessage::Stop {
            source_ids: sources.to_vec(),
        });
    }
}

/// Microphone held by the client; releasing it tells the client to stop capturing.
struct ClientCapture {
    outbound: UnboundedSender<ServerMessage>,
    block_size: usize,
    started: bool,
}

impl CaptureStream for ClientCapture {
    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let _ = self.outbound.send(ServerMessage::CaptureStarted {
            sample_rate: INPUT_SAMPLE_RATE,
            block_size: self.block_size,
        });
    }

    fn sample_rate(&self) -> u32 {
        INPUT_SAMPLE_RATE
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Drop for ClientCapture {
    fn drop(&mut self) {
        if self.started {
            let _ = self.outbound.send(ServerMessage::CaptureStopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_capture_requires_permission() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut device = ClientAudioDevice::new(tx, 4096);

        let err = device.request_capture().err().unwrap();
        assert_eq!(err.code(), "permission_denied");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_capture_release_notifies_client() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut device = ClientAudioDevice::new(tx, 4096);
        device.set_microphone_permission(true);

        let mut capture = device.request_capture().unwrap();
        assert_eq!(capture.sample_rate(), 16_000);
        // reserved but not started: the client is not told to capture yet
        assert!(rx.try_recv().is_err());

        capture.start();
        capture.start();
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::CaptureStarted { sample_rate: 16_000, block_size: 4096 }
        );
        assert!(rx.try_recv().is_err());

        drop(capture);
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::CaptureStopped);
    }

    #[test]
    fn test_unstarted_capture_release_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut device = ClientAudioDevice::new(tx, 4096);
        device.set_microphone_permission(true);

        let capture = device.request_capture().unwrap();
        drop(capture);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_schedule_and_stop_emit_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut device = ClientAudioDevice::new(tx, 4096);
        let frame = DecodedFrame {
            sample_rate: 24_000,
            channels: vec![vec![0.0; 2400]],
        };

        let first = device.schedule(&frame, Duration::from_millis(250));
        let second = device.schedule(&frame, Duration::from_millis(350));
        assert_ne!(first, second);

        match rx.try_recv().unwrap() {
            ServerMessage::Play { source_id, start_at_ms, duration_ms, sample_rate, .. } => {
                assert_eq!(source_id, first);
                assert!((start_at_ms - 250.0).abs() < 1e-9);
                assert!((duration_ms - 100.0).abs() < 1e-9);
                assert_eq!(sample_rate, 24_000);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        let _ = rx.try_recv().unwrap();

        device.stop(&[first, second]);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Stop { source_ids: vec![first, second] }
        );

        device.stop(&[]);
        assert!(rx.try_recv().is_err());
    }
}
