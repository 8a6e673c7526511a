//! PCM16 framing helpers for the live session wire format.
//!
//! The remote service exchanges raw 16-bit signed little-endian mono PCM,
//! base64 encoded inside JSON frames. Locally audio is handled as `f32`
//! samples in `[-1.0, 1.0]`.

use base64::prelude::*;
use thiserror::Error;

/// Errors produced while decoding an inbound audio payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PcmError {
    #[error("Invalid base64 audio payload: {0}")]
    Base64(String),

    #[error("PCM16 payload has an odd number of bytes ({0})")]
    OddLength(usize),

    #[error("Audio payload is empty")]
    Empty,
}

/// Convert float samples to PCM16 little-endian bytes.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * 32767.0) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Convert PCM16 little-endian bytes to float samples.
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Result<Vec<f32>, PcmError> {
    if bytes.is_empty() {
        return Err(PcmError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            if value < 0 {
                f32::from(value) / 32768.0
            } else {
                f32::from(value) / 32767.0
            }
        })
        .collect())
}

/// Encode float samples as a base64 PCM16 payload.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    BASE64_STANDARD.encode(f32_to_pcm16_le(samples))
}

/// Decode a base64 PCM16 payload into float samples.
pub fn decode_pcm16_base64(payload: &str) -> Result<Vec<f32>, PcmError> {
    let bytes = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| PcmError::Base64(e.to_string()))?;
    pcm16_le_to_f32(&bytes)
}

/// MIME type advertised for outbound audio at the given capture rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Average interleaved channels down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = usize::from(channels);
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
