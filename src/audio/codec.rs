//! # PCM Wire Codec
//!
//! Converts between float samples and the endpoint's wire format:
//! little-endian 16-bit signed PCM, interleaved by channel, base64-framed.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use crate::audio::INPUT_SAMPLE_RATE;
use crate::error::LiveError;

/// One base64-framed audio chunk as exchanged with the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFrame {
    pub mime_type: String,
    pub data: String,
}

impl EncodedFrame {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Mime type for raw PCM at the given rate, e.g. `audio/pcm;rate=16000`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// A decoded, playable buffer of synthesized speech.
///
/// Samples are stored per channel in the range [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedFrame {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Playback length, exact to the nanosecond.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.frame_count() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Samples re-interleaved by channel (frame-major order).
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.channel_count());
        for i in 0..frames {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }
}

/// Encode one microphone block for transmission.
///
/// Samples are clamped to [-1.0, 1.0] before scaling so that a full-scale
/// positive sample saturates at `i16::MAX` instead of wrapping.
pub fn encode_capture(samples: &[f32]) -> EncodedFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32);
        // Writing into a Vec cannot fail
        let _ = bytes.write_i16::<LittleEndian>(scaled as i16);
    }

    EncodedFrame::new(pcm_mime_type(INPUT_SAMPLE_RATE), STANDARD.encode(bytes))
}

/// Decode one inbound frame into a playable buffer.
pub fn decode_frame(frame: &EncodedFrame, sample_rate: u32, channels: u16) -> Result<DecodedFrame, LiveError> {
    if channels == 0 {
        return Err(LiveError::Decode("channel count must be at least 1".to_string()));
    }

    let bytes = STANDARD
        .decode(frame.data.trim())
        .map_err(|e| LiveError::Decode(format!("invalid base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(LiveError::Decode("audio frame is empty".to_string()));
    }

    if bytes.len() % 2 != 0 {
        return Err(LiveError::Decode(format!(
            "byte length {} is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    let sample_count = bytes.len() / 2;
    let channel_count = channels as usize;
    if sample_count % channel_count != 0 {
        return Err(LiveError::Decode(format!(
            "{} samples do not divide into {} channels",
            sample_count, channel_count
        )));
    }

    let frames = sample_count / channel_count;
    let mut decoded = vec![Vec::with_capacity(frames); channel_count];
    let mut cursor = Cursor::new(bytes);
    for i in 0..sample_count {
        let sample = cursor
            .read_i16::<LittleEndian>()
            .map_err(|e| LiveError::Decode(e.to_string()))?;
        decoded[i % channel_count].push(sample as f32 / 32768.0);
    }

    Ok(DecodedFrame {
        sample_rate,
        channels: decoded,
    })
}

/// Read little-endian `f32` samples, the format capture blocks arrive in from the client.
pub fn read_f32_samples(data: &[u8]) -> Result<Vec<f32>, String> {
    if data.is_empty() {
        return Err("Audio data is empty".to_string());
    }
    if data.len() % 4 != 0 {
        return Err("Audio data length must be a multiple of 4 for 32-bit float samples".to_string());
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 4);
    while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

/// Base64 of little-endian `f32` samples, the format playback buffers are sent to the client in.
pub fn encode_f32_base64(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for &sample in samples {
        let _ = bytes.write_f32::<LittleEndian>(sample);
    }
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CHANNELS, OUTPUT_SAMPLE_RATE};

    fn pcm_frame(samples: &[i16]) -> EncodedFrame {
        let mut bytes = Vec::new();
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        EncodedFrame::new(pcm_mime_type(OUTPUT_SAMPLE_RATE), STANDARD.encode(bytes))
    }

    #[test]
    fn test_encode_capture_scales_and_saturates() {
        let frame = encode_capture(&[0.0, 0.5, -0.5, 1.0, -1.0, 3.0]);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");

        let bytes = STANDARD.decode(&frame.data).unwrap();
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![0, 16384, -16384, i16::MAX, i16::MIN, i16::MAX]);
    }

    #[test]
    fn test_decode_frame_mono() {
        let frame = pcm_frame(&[0, 16384, -16384, -32768]);
        let decoded = decode_frame(&frame, OUTPUT_SAMPLE_RATE, CHANNELS).unwrap();
        assert_eq!(decoded.channel_count(), 1);
        assert_eq!(decoded.channels[0], vec![0.0, 0.5, -0.5, -1.0]);
    }

    #[test]
    fn test_decode_frame_deinterleaves_stereo() {
        let frame = pcm_frame(&[100, -100, 200, -200]);
        let decoded = decode_frame(&frame, 48_000, 2).unwrap();
        assert_eq!(decoded.frame_count(), 2);
        assert_eq!(decoded.channels[0], vec![100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(decoded.channels[1], vec![-100.0 / 32768.0, -200.0 / 32768.0]);
        assert_eq!(decoded.interleaved().len(), 4);
    }

    #[test]
    fn test_duration_is_exact() {
        let decoded = DecodedFrame {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: vec![vec![0.0; 12_000]],
        };
        assert_eq!(decoded.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_decode_frame_rejects_malformed_input() {
        let bad_base64 = EncodedFrame::new("audio/pcm;rate=24000", "not base64!!");
        assert!(matches!(decode_frame(&bad_base64, 24_000, 1), Err(LiveError::Decode(_))));

        let odd = EncodedFrame::new("audio/pcm;rate=24000", STANDARD.encode([1u8, 2, 3]));
        assert!(matches!(decode_frame(&odd, 24_000, 1), Err(LiveError::Decode(_))));

        let empty = EncodedFrame::new("audio/pcm;rate=24000", "");
        assert!(matches!(decode_frame(&empty, 24_000, 1), Err(LiveError::Decode(_))));

        let uneven_channels = pcm_frame(&[1, 2, 3]);
        assert!(matches!(decode_frame(&uneven_channels, 24_000, 2), Err(LiveError::Decode(_))));
    }

    #[test]
    fn test_read_f32_samples() {
        let mut data = Vec::new();
        for s in [0.25f32, -0.75] {
            data.extend_from_slice(&s.to_le_bytes());
        }
        assert_eq!(read_f32_samples(&data).unwrap(), vec![0.25, -0.75]);
        assert!(read_f32_samples(&data[..5]).is_err());
        assert!(read_f32_samples(&[]).is_err());
    }
}
