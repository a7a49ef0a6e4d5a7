use super::*;
use crate::audio::{encode_pcm16, PipelineMetrics, RecordingBuffer};
use crate::config::{PipelineConfig, SessionConfig};
use crate::live::LiveConnection;
use std::sync::atomic::AtomicUsize;

struct FakeCallAudio {
    target: String,
    playback_calls: Mutex<Vec<(usize, Duration)>>,
    recorded: Mutex<RecordingBuffer>,
    stopped: AtomicBool,
    fail_stop: bool,
}

impl FakeCallAudio {
    fn new(target: &str, fail_stop: bool) -> Self {
        Self {
            target: target.to_string(),
            playback_calls: Mutex::new(Vec::new()),
            recorded: Mutex::new(RecordingBuffer::new()),
            stopped: AtomicBool::new(false),
            fail_stop,
        }
    }
}

impl CallAudio for FakeCallAudio {
    fn playback(&self, samples: Vec<f32>, duration: Duration) {
        self.playback_calls
            .lock()
            .unwrap()
            .push((samples.len(), duration));
        self.recorded.lock().unwrap().append(encode_pcm16(&samples));
    }

    fn stop(&self) -> Result<Option<RecordingArtifact>, CallError> {
        if self.fail_stop {
            return Err(CallError::RecorderFlush("disk full".to_string()));
        }
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }
        let buffer = std::mem::take(&mut *self.recorded.lock().unwrap());
        if buffer.is_empty() {
            return Ok(None);
        }
        buffer.finalize(&self.target).map(Some)
    }

    fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            blocks_processed: self.playback_calls.lock().unwrap().len(),
            blocks_dropped: 0,
        }
    }
}

#[derive(Default)]
struct FakeAudioSystem {
    fail: AtomicBool,
    fail_stop: AtomicBool,
    started: Mutex<Vec<Arc<FakeCallAudio>>>,
}

impl AudioSystem for FakeAudioSystem {
    fn start(
        &self,
        _config: &PipelineConfig,
        target: &str,
        _meter: VolumeMeter,
        _outbound: Arc<OutboundLink>,
        _muted: Arc<AtomicBool>,
    ) -> Result<Arc<dyn CallAudio>, CallError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(CallError::DeviceUnavailable(
                "microphone permission denied".to_string(),
            ));
        }
        let pipeline = Arc::new(FakeCallAudio::new(
            target,
            self.fail_stop.load(Ordering::Relaxed),
        ));
        self.started.lock().unwrap().push(pipeline.clone());
        Ok(pipeline)
    }
}

struct FakeConnection {
    closed: Arc<AtomicBool>,
}

impl LiveConnection for FakeConnection {
    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct FakeConnector {
    fail: AtomicBool,
    opened: AtomicUsize,
    directives: Mutex<Vec<String>>,
    handlers: Mutex<Vec<SessionHandlers>>,
    connections: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeConnector {
    fn fire_alert(&self) {
        let handlers = self.handlers.lock().unwrap();
        let latest = handlers.last().expect("no connection opened");
        (latest.on_alert)();
    }

    fn fire_audio(&self, samples: Vec<f32>, duration: Duration) {
        let handlers = self.handlers.lock().unwrap();
        let latest = handlers.last().expect("no connection opened");
        (latest.on_audio)(samples, duration);
    }
}

impl LiveConnector for FakeConnector {
    fn open(
        &self,
        _config: &SessionConfig,
        directive: &str,
        _outbound: Arc<OutboundLink>,
        handlers: SessionHandlers,
    ) -> Result<Box<dyn LiveConnection>, CallError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(CallError::ConnectionFailed("handshake rejected".to_string()));
        }
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.directives.lock().unwrap().push(directive.to_string());
        self.handlers.lock().unwrap().push(handlers);
        let closed = Arc::new(AtomicBool::new(false));
        self.connections.lock().unwrap().push(closed.clone());
        Ok(Box::new(FakeConnection { closed }))
    }
}

struct Harness {
    controller: CallController,
    audio: Arc<FakeAudioSystem>,
    connector: Arc<FakeConnector>,
}

fn harness() -> Harness {
    let audio = Arc::new(FakeAudioSystem::default());
    let connector = Arc::new(FakeConnector::default());
    let controller = CallController::with_parts(
        PipelineConfig::default(),
        SessionConfig::default(),
        audio.clone(),
        connector.clone(),
    );
    Harness {
        controller,
        audio,
        connector,
    }
}

#[test]
fn kevin_negotiation_scenario_end_to_end() {
    let mut h = harness();

    h.controller.start_call("Kevin").expect("start call");
    assert_eq!(h.controller.state(), CallState::Active);
    assert_eq!(h.controller.target(), "Kevin");

    h.controller
        .engage(AgentMode::Negotiate, "waive late fee")
        .expect("engage");
    assert_eq!(h.controller.state(), CallState::AgentEngaged);
    {
        let directives = h.connector.directives.lock().unwrap();
        assert!(directives[0].contains("negotiator"));
        assert!(directives[0].contains("waive late fee"));
    }

    // Agent speaks; the segment must reach playback and the recording.
    h.connector
        .fire_audio(vec![0.3f32; 2_400], Duration::from_millis(100));

    h.controller.disengage().expect("disengage");
    assert_eq!(h.controller.state(), CallState::Active);

    let summary = h.controller.end_call();
    assert_eq!(h.controller.state(), CallState::Idle);
    let artifact = summary.artifact.expect("recording artifact");
    assert!(!artifact.is_empty());
    assert!(artifact.file_name.starts_with("cruise-control-kevin-"));
    assert!(summary.recorder_error.is_none());
}

#[test]
fn empty_target_is_rejected_without_state_change() {
    let mut h = harness();
    let err = h.controller.start_call("").expect_err("must reject");
    assert!(matches!(err, CallError::EmptyTarget));
    assert_eq!(h.controller.state(), CallState::Idle);
    assert!(h.audio.started.lock().unwrap().is_empty());

    let err = h.controller.start_call("   ").expect_err("must reject");
    assert!(matches!(err, CallError::EmptyTarget));
    assert_eq!(h.controller.state(), CallState::Idle);
}

#[test]
fn microphone_denial_rolls_back_to_idle() {
    let mut h = harness();
    h.audio.fail.store(true, Ordering::Relaxed);

    let err = h.controller.start_call("Kevin").expect_err("device denied");
    assert!(matches!(err, CallError::DeviceUnavailable(_)));
    assert_eq!(h.controller.state(), CallState::Idle);
    assert!(h.audio.started.lock().unwrap().is_empty());

    // The machine stays reusable after the rollback.
    h.audio.fail.store(false, Ordering::Relaxed);
    h.controller.start_call("Kevin").expect("retry succeeds");
    assert_eq!(h.controller.state(), CallState::Active);
}

#[test]
fn start_call_twice_is_invalid() {
    let mut h = harness();
    h.controller.start_call("Kevin").expect("start");
    let err = h.controller.start_call("Dana").expect_err("second start");
    assert!(matches!(
        err,
        CallError::InvalidState {
            operation: "start_call",
            ..
        }
    ));
    assert_eq!(h.controller.target(), "Kevin");
}

#[test]
fn engage_requires_an_active_call() {
    let mut h = harness();
    let err = h
        .controller
        .engage(AgentMode::Casual, "")
        .expect_err("no call");
    assert!(matches!(err, CallError::InvalidState { .. }));
    assert_eq!(h.controller.state(), CallState::Idle);
}

#[test]
fn engage_failure_returns_to_active() {
    let mut h = harness();
    h.controller.start_call("Kevin").expect("start");
    h.connector.fail.store(true, Ordering::Relaxed);

    let err = h
        .controller
        .engage(AgentMode::Casual, "")
        .expect_err("handshake rejected");
    assert!(matches!(err, CallError::ConnectionFailed(_)));
    assert_eq!(h.controller.state(), CallState::Active);

    // Connection becomes available again; the same call can engage.
    h.connector.fail.store(false, Ordering::Relaxed);
    h.controller.engage(AgentMode::Casual, "").expect("engage");
    assert_eq!(h.controller.state(), CallState::AgentEngaged);
}

#[test]
fn engage_while_engaged_is_invalid_and_leaks_nothing() {
    let mut h = harness();
    h.controller.start_call("Kevin").expect("start");
    h.controller.engage(AgentMode::Casual, "").expect("engage");

    let err = h
        .controller
        .engage(AgentMode::Negotiate, "")
        .expect_err("already engaged");
    assert!(matches!(err, CallError::InvalidState { .. }));
    assert_eq!(h.connector.opened.load(Ordering::Relaxed), 1);
    assert_eq!(h.controller.state(), CallState::AgentEngaged);
}

#[test]
fn alert_signal_promotes_engaged_call() {
    let mut h = harness();
    h.controller.start_call("Landlord").expect("start");
    h.controller.engage(AgentMode::Monitor, "").expect("engage");

    h.connector.fire_alert();
    assert_eq!(h.controller.state(), CallState::Alert);

    h.controller.disengage().expect("disengage from alert");
    assert_eq!(h.controller.state(), CallState::Active);
    assert!(h.connector.connections.lock().unwrap()[0].load(Ordering::Relaxed));
}

#[test]
fn stale_alert_after_disengage_is_ignored() {
    let mut h = harness();
    h.controller.start_call("Landlord").expect("start");
    h.controller.engage(AgentMode::Monitor, "").expect("engage");
    h.controller.disengage().expect("disengage");

    // The session thread may still fire a queued alert after disconnect.
    h.connector.fire_alert();
    assert_eq!(h.controller.state(), CallState::Active);
}

#[test]
fn inbound_audio_routes_to_pipeline_playback() {
    let mut h = harness();
    h.controller.start_call("Kevin").expect("start");
    h.controller.engage(AgentMode::Casual, "").expect("engage");

    h.connector
        .fire_audio(vec![0.1f32; 4_800], Duration::from_millis(200));

    let started = h.audio.started.lock().unwrap();
    let calls = started[0].playback_calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[(4_800, Duration::from_millis(200))]);
}

#[test]
fn end_call_from_engaged_disconnects_then_stops_audio() {
    let mut h = harness();
    h.controller.start_call("Kevin").expect("start");
    h.controller.engage(AgentMode::Casual, "").expect("engage");

    let summary = h.controller.end_call();
    assert_eq!(h.controller.state(), CallState::Idle);
    assert!(h.connector.connections.lock().unwrap()[0].load(Ordering::Relaxed));
    assert!(h.audio.started.lock().unwrap()[0]
        .stopped
        .load(Ordering::Relaxed));
    // Nothing was spoken, so there is nothing to flush.
    assert!(summary.artifact.is_none());
    assert!(summary.recorder_error.is_none());
}

#[test]
fn end_call_from_alert_returns_to_idle() {
    let mut h = harness();
    h.controller.start_call("Kevin").expect("start");
    h.controller.engage(AgentMode::Monitor, "").expect("engage");
    h.connector.fire_alert();
    assert_eq!(h.controller.state(), CallState::Alert);

    let _ = h.controller.end_call();
    assert_eq!(h.controller.state(), CallState::Idle);
}

#[test]
fn end_call_resets_per_call_configuration() {
    let mut h = harness();
    h.controller.start_call("Kevin").expect("start");
    h.controller.set_muted(true);
    h.controller
        .engage(AgentMode::Filibuster, "stall forever")
        .expect("engage");

    let _ = h.controller.end_call();
    assert_eq!(h.controller.state(), CallState::Idle);
    assert_eq!(h.controller.target(), "");
    assert_eq!(h.controller.goal(), "");
    assert_eq!(h.controller.mode(), AgentMode::Casual);
    assert!(!h.controller.is_muted());
    let volumes = h.controller.volumes();
    assert_eq!(volumes.user, 0.0);
    assert_eq!(volumes.agent, 0.0);
}

#[test]
fn end_call_when_idle_is_a_quiet_no_op() {
    let mut h = harness();
    let summary = h.controller.end_call();
    assert!(summary.artifact.is_none());
    assert!(summary.recorder_error.is_none());
    assert_eq!(h.controller.state(), CallState::Idle);
}

#[test]
fn recorder_failure_surfaces_in_summary_not_panic() {
    let mut h = harness();
    h.audio.fail_stop.store(true, Ordering::Relaxed);
    h.controller.start_call("Kevin").expect("start");

    let summary = h.controller.end_call();
    assert_eq!(h.controller.state(), CallState::Idle);
    assert!(summary.artifact.is_none());
    let error = summary.recorder_error.expect("flush error reported");
    assert!(error.contains("disk full"));
}

#[test]
fn controller_is_reusable_across_calls() {
    let mut h = harness();
    for target in ["Kevin", "Dana", "Landlord"] {
        h.controller.start_call(target).expect("start");
        h.controller.engage(AgentMode::Casual, "").expect("engage");
        let _ = h.controller.end_call();
        assert_eq!(h.controller.state(), CallState::Idle);
    }
    assert_eq!(h.audio.started.lock().unwrap().len(), 3);
    assert_eq!(h.connector.opened.load(Ordering::Relaxed), 3);
}

#[test]
fn set_mode_and_goal_feed_the_next_engage() {
    let mut h = harness();
    h.controller.set_mode(AgentMode::Filibuster);
    h.controller.set_goal("  keep them busy  ");
    assert_eq!(h.controller.mode(), AgentMode::Filibuster);
    assert_eq!(h.controller.goal(), "keep them busy");

    h.controller.start_call("Kevin").expect("start");
    h.controller
        .engage(h.controller.mode(), "keep them busy")
        .expect("engage");
    let directives = h.connector.directives.lock().unwrap();
    assert!(directives[0].contains("waste the other person's time"));
    assert!(directives[0].contains("keep them busy"));
}

#[test]
fn state_labels_are_stable() {
    assert_eq!(CallState::Idle.label(), "idle");
    assert_eq!(CallState::Connecting.label(), "connecting");
    assert_eq!(CallState::Active.label(), "active");
    assert_eq!(CallState::AgentEngaged.label(), "agent_engaged");
    assert_eq!(CallState::Alert.label(), "alert");
}
