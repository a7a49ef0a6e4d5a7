//! Error taxonomy for call control.
//!
//! Every failure here is local to the operation that produced it: a failed
//! engage leaves the call active, a failed microphone acquisition rolls the
//! call back to idle, and a decode failure drops one inbound segment without
//! ending the session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// Microphone could not be acquired (permission denied or no device).
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote collaborator rejected the streaming handshake.
    #[error("streaming connection failed: {0}")]
    ConnectionFailed(String),

    /// An inbound audio payload could not be decoded. The session loop
    /// absorbs these itself (bad segments are dropped, the session stays up);
    /// the variant carries `decode_base64` failures for callers composing
    /// their own flows with `?`.
    #[error("inbound audio decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The recording could not be finalized into an artifact.
    #[error("recording flush failed: {0}")]
    RecorderFlush(String),

    /// The requested operation is not legal in the current call state.
    #[error("invalid call state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Call target was empty or whitespace.
    #[error("call target must not be empty")]
    EmptyTarget,
}

/// Malformed base64 in an inbound audio payload. Misaligned (odd-length)
/// PCM payloads are not an error; the trailing partial sample is truncated.
#[derive(Debug, Error)]
#[error("invalid base64 audio payload: {0}")]
pub struct DecodeError(#[from] pub base64::DecodeError);
