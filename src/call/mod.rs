//! Call lifecycle state machine.
//!
//! `CallController` is the only surface outside code talks to. It owns the
//! audio pipeline for the duration of a call, the streaming session while the
//! agent is engaged, and the per-call configuration (target, mode, goal,
//! mute). The session thread reaches back into the controller only through
//! the shared state handle, so an alert can land while the caller holds no
//! lock.

#[cfg(test)]
mod tests;

use crate::audio::{
    AudioSystem, CallAudio, CpalAudioSystem, RecordingArtifact, VolumeMeter, VolumeSample,
};
use crate::config::{AppConfig, PipelineConfig, SessionConfig};
use crate::error::CallError;
use crate::live::{
    AgentMode, LiveConnector, OutboundLink, SessionHandlers, SessionManager, TungsteniteConnector,
};
use crate::{log_debug, log_debug_content};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Where the call currently stands. `Connecting` covers both device
/// acquisition and the streaming handshake; the rollback target differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Connecting,
    Active,
    AgentEngaged,
    /// Agent is still engaged but has detected a live human and wants the
    /// user back on the line.
    Alert,
}

impl CallState {
    pub fn label(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::AgentEngaged => "agent_engaged",
            CallState::Alert => "alert",
        }
    }
}

/// What `end_call` hands back. Ending a call never fails; a recorder problem
/// is reported here instead of interrupting teardown.
#[derive(Debug, Default)]
pub struct CallSummary {
    pub artifact: Option<RecordingArtifact>,
    pub recorder_error: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: CallState,
    last_session_error: Option<String>,
}

pub struct CallController {
    pipeline_config: PipelineConfig,
    audio_system: Arc<dyn AudioSystem>,
    sessions: SessionManager,
    shared: Arc<Mutex<Shared>>,
    meter: VolumeMeter,
    muted: Arc<AtomicBool>,
    pipeline: Option<Arc<dyn CallAudio>>,
    target: String,
    mode: AgentMode,
    goal: String,
}

impl CallController {
    /// Controller over real CPAL devices and the websocket transport.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_parts(
            config.pipeline_config(),
            config.session_config(),
            Arc::new(CpalAudioSystem),
            Arc::new(TungsteniteConnector),
        )
    }

    /// Seam for tests: inject fake audio and transport.
    pub fn with_parts(
        pipeline_config: PipelineConfig,
        session_config: SessionConfig,
        audio_system: Arc<dyn AudioSystem>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        let outbound = Arc::new(OutboundLink::new());
        Self {
            pipeline_config,
            audio_system,
            sessions: SessionManager::new(connector, session_config, outbound),
            shared: Arc::new(Mutex::new(Shared::default())),
            meter: VolumeMeter::new(),
            muted: Arc::new(AtomicBool::new(false)),
            pipeline: None,
            target: String::new(),
            mode: AgentMode::default(),
            goal: String::new(),
        }
    }

    pub fn state(&self) -> CallState {
        lock_shared(&self.shared).state
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Last observed user/agent loudness pair.
    pub fn volumes(&self) -> VolumeSample {
        self.meter.sample()
    }

    pub fn last_session_error(&self) -> Option<String> {
        lock_shared(&self.shared).last_session_error.clone()
    }

    /// Default mode for the next engage. Takes effect on the next `engage`;
    /// an open connection keeps its directive.
    pub fn set_mode(&mut self, mode: AgentMode) {
        self.mode = mode;
    }

    pub fn set_goal(&mut self, goal: &str) {
        self.goal = goal.trim().to_string();
    }

    /// Gate the outbound microphone leg. Metering and recording continue
    /// while muted; only the streaming session stops hearing the user.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Acquire audio for a new call. On device failure the machine rolls
    /// back to idle with no pipeline allocated.
    pub fn start_call(&mut self, target: &str) -> Result<(), CallError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(CallError::EmptyTarget);
        }
        {
            let mut shared = lock_shared(&self.shared);
            if shared.state != CallState::Idle {
                return Err(CallError::InvalidState {
                    operation: "start_call",
                    state: shared.state.label(),
                });
            }
            shared.state = CallState::Connecting;
            shared.last_session_error = None;
        }

        match self.audio_system.start(
            &self.pipeline_config,
            target,
            self.meter.clone(),
            self.sessions.outbound(),
            self.muted.clone(),
        ) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.target = target.to_string();
                lock_shared(&self.shared).state = CallState::Active;
                log_debug("call: active");
                log_debug_content(&format!("call target: {target}"));
                Ok(())
            }
            Err(err) => {
                lock_shared(&self.shared).state = CallState::Idle;
                log_debug(&format!("call: audio acquisition failed: {err}"));
                Err(err)
            }
        }
    }

    /// Hand the call to the agent. On connection failure the call stays
    /// active with the user on the line.
    pub fn engage(&mut self, mode: AgentMode, goal: &str) -> Result<(), CallError> {
        let Some(pipeline) = self.pipeline.clone() else {
            return Err(CallError::InvalidState {
                operation: "engage",
                state: CallState::Idle.label(),
            });
        };
        {
            let mut shared = lock_shared(&self.shared);
            if shared.state != CallState::Active {
                return Err(CallError::InvalidState {
                    operation: "engage",
                    state: shared.state.label(),
                });
            }
            shared.state = CallState::Connecting;
        }
        self.mode = mode;
        self.goal = goal.trim().to_string();

        let audio_pipeline = pipeline.clone();
        let alert_shared = self.shared.clone();
        let close_shared = self.shared.clone();
        let handlers = SessionHandlers {
            on_audio: Box::new(move |samples, duration: Duration| {
                audio_pipeline.playback(samples, duration);
            }),
            on_alert: Box::new(move || {
                let mut shared = lock_shared(&alert_shared);
                if shared.state == CallState::AgentEngaged {
                    shared.state = CallState::Alert;
                    log_debug("call: alert raised");
                }
            }),
            on_close: Box::new(move |reason| {
                if let Some(reason) = reason {
                    log_debug(&format!("call: session closed: {reason}"));
                    lock_shared(&close_shared).last_session_error = Some(reason);
                }
            }),
        };

        match self.sessions.connect(self.mode, &self.goal, handlers) {
            Ok(()) => {
                lock_shared(&self.shared).state = CallState::AgentEngaged;
                log_debug(&format!("call: agent engaged mode={}", self.mode.label()));
                log_debug_content(&format!("call goal: {}", self.goal));
                Ok(())
            }
            Err(err) => {
                lock_shared(&self.shared).state = CallState::Active;
                log_debug(&format!("call: engage failed: {err}"));
                Err(err)
            }
        }
    }

    /// Take the call back from the agent. Valid from both the engaged and
    /// alert states; the audio pipeline is untouched.
    pub fn disengage(&mut self) -> Result<(), CallError> {
        {
            let shared = lock_shared(&self.shared);
            if !matches!(shared.state, CallState::AgentEngaged | CallState::Alert) {
                return Err(CallError::InvalidState {
                    operation: "disengage",
                    state: shared.state.label(),
                });
            }
        }
        self.sessions.disconnect();
        lock_shared(&self.shared).state = CallState::Active;
        log_debug("call: disengaged");
        Ok(())
    }

    /// Tear the call down from any state. Disconnects the session, stops the
    /// pipeline, and resets per-call configuration; always lands in idle.
    pub fn end_call(&mut self) -> CallSummary {
        if lock_shared(&self.shared).state == CallState::Idle {
            return CallSummary::default();
        }
        self.sessions.disconnect();

        let mut summary = CallSummary::default();
        if let Some(pipeline) = self.pipeline.take() {
            match pipeline.stop() {
                Ok(artifact) => summary.artifact = artifact,
                Err(err) => {
                    log_debug(&format!("call: recording flush failed: {err}"));
                    summary.recorder_error = Some(err.to_string());
                }
            }
            let metrics = pipeline.metrics();
            log_debug(&format!(
                "call_metrics|blocks_processed={}|blocks_dropped={}|artifact_bytes={}",
                metrics.blocks_processed,
                metrics.blocks_dropped,
                summary.artifact.as_ref().map(|a| a.len()).unwrap_or(0)
            ));
        }

        self.target.clear();
        self.goal.clear();
        self.mode = AgentMode::default();
        self.muted.store(false, Ordering::Relaxed);
        self.meter.reset();
        {
            let mut shared = lock_shared(&self.shared);
            shared.state = CallState::Idle;
            shared.last_session_error = None;
        }
        log_debug("call: ended");
        summary
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        if lock_shared(&self.shared).state != CallState::Idle {
            let _ = self.end_call();
        }
    }
}

fn lock_shared(shared: &Arc<Mutex<Shared>>) -> MutexGuard<'_, Shared> {
    shared
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
