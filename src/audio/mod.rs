//! Real-time call audio pipeline.
//!
//! Captures microphone audio via CPAL, downmixes and resamples it to 16kHz
//! mono blocks, and fans each block out to the volume meter, the call
//! recording, and the streaming session. Inbound agent segments arrive at
//! 24kHz and flow back through playback and the same recording.

/// Sample rate of outbound microphone blocks.
pub const CAPTURE_RATE: u32 = 16_000;

/// Sample rate of inbound agent audio segments.
pub const PLAYBACK_RATE: u32 = 24_000;

/// MIME descriptor attached to every outbound audio frame.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

mod dispatch;
mod meter;
mod pcm;
mod pipeline;
mod recorder;
mod resample;

pub use meter::{level, VolumeMeter, VolumeSample};
pub use pcm::{decode_base64, decode_pcm16, encode_base64, encode_pcm16};
pub use pipeline::{
    list_input_devices, AudioSystem, CallAudio, CpalAudioSystem, PipelineMetrics,
};
pub use recorder::{artifact_file_name, RecordingArtifact, RecordingBuffer};
