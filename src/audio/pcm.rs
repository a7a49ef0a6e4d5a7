//! PCM wire codec for the streaming session.
//!
//! Outbound frames are quantized from f32 [-1.0, 1.0] to little-endian 16-bit
//! PCM and carried as base64 text; inbound segments reverse the same path.

use crate::error::DecodeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

const PCM_SCALE: f32 = 32_768.0;

/// Quantize float samples to little-endian 16-bit PCM bytes. Out-of-range
/// samples clamp instead of wrapping.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let scaled = (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32);
        bytes.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    bytes
}

/// Encode one capture block into its base64 transport form.
pub fn encode_base64(samples: &[f32]) -> String {
    BASE64.encode(encode_pcm16(samples))
}

/// Decode little-endian 16-bit PCM bytes back to float samples. A trailing
/// odd byte is not a full sample and is truncated.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect()
}

/// Decode a base64 transport payload into float samples.
pub fn decode_base64(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = BASE64.decode(data)?;
    Ok(decode_pcm16(&bytes))
}
