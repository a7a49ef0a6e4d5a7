pub mod audio;
pub mod call;
pub mod config;
pub mod error;
pub mod live;
mod logging;
mod telemetry;

pub use audio::{VolumeMeter, VolumeSample};
pub use call::{CallController, CallState, CallSummary};
pub use error::CallError;
pub use live::AgentMode;
pub use logging::{init_logging, log_debug, log_debug_content, log_file_path, log_panic};
pub use telemetry::init_tracing;
