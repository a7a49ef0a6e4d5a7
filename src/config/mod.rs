//! Command-line parsing and validation helpers.

mod validation;

use clap::Parser;
use std::path::PathBuf;

/// Default remote conversational model for engaged calls.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
/// Default bidirectional streaming endpoint.
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
/// Default synthesized voice identity declared at session setup.
pub const DEFAULT_VOICE: &str = "Kore";
/// Default capture block size in samples (matches the original pipeline).
pub const DEFAULT_BLOCK_SAMPLES: usize = 4096;
/// Default capacity of the capture frame channel.
pub const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 64;

/// CLI options for the cruisecall pipeline. Validated values keep the audio
/// threads and the streaming session within safe bounds.
#[derive(Debug, Parser, Clone)]
#[command(about = "Cruise-control call pipeline", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Remote conversational model identifier
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Streaming endpoint for the remote collaborator
    #[arg(long, env = "CRUISECALL_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// API key appended to the streaming endpoint
    #[arg(long = "api-key", env = "GEMINI_API_KEY", default_value = "")]
    pub api_key: String,

    /// Synthesized voice identity for agent speech
    #[arg(long, default_value = DEFAULT_VOICE)]
    pub voice: String,

    /// Capture block size in samples
    #[arg(long = "block-samples", default_value_t = DEFAULT_BLOCK_SAMPLES)]
    pub block_samples: usize,

    /// Capacity of the capture frame channel
    #[arg(long = "frame-channel-capacity", default_value_t = DEFAULT_FRAME_CHANNEL_CAPACITY)]
    pub frame_channel_capacity: usize,

    /// Directory where finished call recordings are written
    #[arg(long = "recording-dir", default_value = ".")]
    pub recording_dir: PathBuf,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "CRUISECALL_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "CRUISECALL_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging call targets and goal text (debug log only)
    #[arg(
        long = "log-content",
        env = "CRUISECALL_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

impl AppConfig {
    /// Snapshot the knobs the audio pipeline needs per call.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            input_device: self.input_device.clone(),
            block_samples: self.block_samples,
            frame_channel_capacity: self.frame_channel_capacity,
        }
    }

    /// Snapshot the knobs the streaming session needs per connection.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            voice: self.voice.clone(),
        }
    }
}

/// Audio pipeline knobs, decoupled from the CLI surface.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_device: Option<String>,
    pub block_samples: usize,
    pub frame_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            block_samples: DEFAULT_BLOCK_SAMPLES,
            frame_channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
        }
    }
}

/// Streaming session knobs, decoupled from the CLI surface.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}
