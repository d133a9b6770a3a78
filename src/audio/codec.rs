//! PCM wire encoding for the realtime session
//!
//! Outbound frames are 16 kHz mono little-endian `i16`, base64 encoded.
//! Inbound chunks are 24 kHz mono in the same representation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::Result;

/// Sample rate of captured microphone audio
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized audio received from the model
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// MIME type announced for outbound audio
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Width of one PCM sample on the wire
const BYTES_PER_SAMPLE: usize = 2;

/// An encoded audio payload ready for transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Base64 of little-endian 16-bit PCM
    pub data: String,
    /// MIME type including the sample rate
    pub mime_type: String,
}

/// Decoded audio ready to be scheduled on an output context
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Build a buffer from interleaved samples
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encode a captured frame for transport
///
/// Samples are clamped to [-1, 1] and scaled to the signed 16-bit range.
#[must_use]
pub fn encode(frame: &[f32]) -> AudioChunk {
    let mut bytes = Vec::with_capacity(frame.len() * BYTES_PER_SAMPLE);
    for &sample in frame {
        #[allow(clippy::cast_possible_truncation)]
        let pcm = (sample.clamp(-1.0, 1.0) * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&pcm.to_le_bytes());
    }

    AudioChunk {
        data: STANDARD.encode(bytes),
        mime_type: INPUT_MIME_TYPE.to_string(),
    }
}

/// Decode the base64 wire representation into raw bytes
///
/// # Errors
///
/// Returns error if the payload is not valid base64
pub fn decode(data: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(data)?)
}

/// Reconstruct a playable buffer from raw little-endian PCM bytes
///
/// Trailing bytes that do not form a whole sample frame are dropped.
#[must_use]
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioBuffer {
    let channels = channels.max(1);
    let frame_width = BYTES_PER_SAMPLE * usize::from(channels);
    let usable = bytes.len() - bytes.len() % frame_width;

    let samples = bytes[..usable]
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    AudioBuffer::new(samples, sample_rate, channels)
}
