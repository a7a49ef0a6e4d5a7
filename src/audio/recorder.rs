//! Continuous call recording.
//!
//! Both call legs append encoded PCM chunks in arrival order; at call end the
//! chunks are flushed exactly once into a single downloadable WAV artifact.

use super::CAPTURE_RATE;
use crate::error::CallError;
use chrono::{DateTime, SecondsFormat, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// Finalized recording produced at call end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl RecordingArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Ordered chunks of 16 kHz mono PCM covering everything captured from the
/// microphone and everything played back during one call. Chunks are appended
/// in arrival order and never reordered or dropped.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one encoded PCM chunk. Empty chunks carry no audio and are
    /// skipped.
    pub fn append(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Flush every chunk into a single WAV artifact. Consumes the buffer so
    /// the flush happens exactly once per call.
    pub fn finalize(self, target: &str) -> Result<RecordingArtifact, CallError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: CAPTURE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut bytes = Vec::with_capacity(self.total_bytes + 44);
        {
            let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)
                .map_err(|err| CallError::RecorderFlush(err.to_string()))?;
            for chunk in &self.chunks {
                for pair in chunk.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .map_err(|err| CallError::RecorderFlush(err.to_string()))?;
                }
            }
            writer
                .finalize()
                .map_err(|err| CallError::RecorderFlush(err.to_string()))?;
        }

        Ok(RecordingArtifact {
            file_name: artifact_file_name(target, Utc::now()),
            bytes,
        })
    }
}

/// Build the artifact name from the call target and a timestamp, keeping the
/// target filesystem-safe.
pub fn artifact_file_name(target: &str, at: DateTime<Utc>) -> String {
    let stamp = at.to_rfc3339_opts(SecondsFormat::Secs, true).replace(':', "-");
    format!("cruise-control-{}-{stamp}.wav", sanitize_target(target))
}

fn sanitize_target(target: &str) -> String {
    let cleaned: String = target
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let collapsed: String = cleaned
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if collapsed.is_empty() {
        "call".to_string()
    } else {
        collapsed
    }
}
