use super::directive::{build_directive, AgentMode, ALERT_PHRASE};
use super::protocol::{RealtimeInputMessage, SetupMessage};
use super::session::handle_server_message_for_tests;
use super::{LiveConnection, LiveConnector, OutboundLink, SessionHandlers, SessionManager};
use crate::audio::encode_base64;
use crate::config::SessionConfig;
use crate::error::CallError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn noop_handlers() -> SessionHandlers {
    SessionHandlers {
        on_audio: Box::new(|_, _| {}),
        on_alert: Box::new(|| {}),
        on_close: Box::new(|_| {}),
    }
}

#[test]
fn directive_includes_goal_as_additional_objective() {
    let directive = build_directive(AgentMode::Negotiate, "waive late fee");
    assert!(directive.contains("negotiator"));
    assert!(directive.contains("ADDITIONAL OBJECTIVE: waive late fee"));
}

#[test]
fn directive_omits_objective_for_blank_goal() {
    let directive = build_directive(AgentMode::Casual, "   ");
    assert!(!directive.contains("ADDITIONAL OBJECTIVE"));
}

#[test]
fn monitor_directive_names_the_alert_phrase() {
    let directive = build_directive(AgentMode::Monitor, "");
    assert!(directive.contains(ALERT_PHRASE));
}

#[test]
fn agent_mode_parse_is_case_insensitive() {
    assert_eq!(AgentMode::parse("NEGOTIATE"), Some(AgentMode::Negotiate));
    assert_eq!(AgentMode::parse(" filibuster "), Some(AgentMode::Filibuster));
    assert_eq!(AgentMode::parse("monitor"), Some(AgentMode::Monitor));
    assert_eq!(AgentMode::parse("aggressive"), None);
}

#[test]
fn agent_mode_labels_are_stable() {
    assert_eq!(AgentMode::Monitor.label(), "monitor");
    assert_eq!(AgentMode::Casual.label(), "casual");
    assert_eq!(AgentMode::Negotiate.label(), "negotiate");
    assert_eq!(AgentMode::Filibuster.label(), "filibuster");
}

#[test]
fn setup_message_serializes_camel_case() {
    let config = SessionConfig {
        model: "test-model".to_string(),
        voice: "Kore".to_string(),
        ..SessionConfig::default()
    };
    let json = serde_json::to_string(&SetupMessage::new(&config, "stay quiet")).unwrap();
    assert!(json.contains("\"setup\""));
    assert!(json.contains("\"models/test-model\""));
    assert!(json.contains("\"responseModalities\":[\"AUDIO\"]"));
    assert!(json.contains("\"prebuiltVoiceConfig\""));
    assert!(json.contains("\"voiceName\":\"Kore\""));
    assert!(json.contains("\"systemInstruction\""));
    assert!(json.contains("stay quiet"));
}

#[test]
fn realtime_input_carries_mime_and_payload() {
    let json =
        serde_json::to_string(&RealtimeInputMessage::audio_frame("AAAA".to_string())).unwrap();
    assert!(json.contains("\"realtimeInput\""));
    assert!(json.contains("\"mediaChunks\""));
    assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));
    assert!(json.contains("\"data\":\"AAAA\""));
}

#[test]
fn outbound_link_drops_frames_while_closed() {
    let link = OutboundLink::new();
    assert!(!link.is_open());
    link.forward("frame".to_string());
    assert_eq!(link.dropped_frames(), 1);
}

#[test]
fn outbound_link_forwards_while_open_and_drops_after_clear() {
    let link = OutboundLink::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(4);
    link.install(tx);
    assert!(link.is_open());

    link.forward("one".to_string());
    assert_eq!(rx.try_recv().as_deref(), Ok("one"));
    assert_eq!(link.dropped_frames(), 0);

    link.clear();
    link.forward("two".to_string());
    assert!(rx.try_recv().is_err());
    assert_eq!(link.dropped_frames(), 1);
}

#[test]
fn outbound_link_counts_drops_when_channel_full() {
    let link = OutboundLink::new();
    let (tx, _rx) = tokio::sync::mpsc::channel::<String>(1);
    link.install(tx);
    link.forward("one".to_string());
    link.forward("two".to_string());
    assert_eq!(link.dropped_frames(), 1);
}

#[test]
fn inbound_audio_segment_reaches_handler_with_duration() {
    let samples = vec![0.25f32; 2_400];
    let payload = encode_base64(&samples);
    let json = format!(
        "{{\"serverContent\":{{\"modelTurn\":{{\"parts\":[{{\"inlineData\":{{\"mimeType\":\"audio/pcm;rate=24000\",\"data\":\"{payload}\"}}}}]}}}}}}"
    );

    let received = Arc::new(Mutex::new(Vec::<(usize, Duration)>::new()));
    let sink = received.clone();
    let handlers = SessionHandlers {
        on_audio: Box::new(move |samples, duration| {
            sink.lock().unwrap().push((samples.len(), duration));
        }),
        on_alert: Box::new(|| panic!("unexpected alert")),
        on_close: Box::new(|_| {}),
    };

    handle_server_message_for_tests(&json, &handlers);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, 2_400);
    assert_eq!(received[0].1, Duration::from_secs_f64(0.1));
}

#[test]
fn alert_phrase_in_text_part_raises_alert() {
    let json = "{\"serverContent\":{\"modelTurn\":{\"parts\":[{\"text\":\"USER ALERT, someone is on the line\"}]}}}";
    let alerted = Arc::new(AtomicBool::new(false));
    let flag = alerted.clone();
    let handlers = SessionHandlers {
        on_audio: Box::new(|_, _| {}),
        on_alert: Box::new(move || flag.store(true, Ordering::Relaxed)),
        on_close: Box::new(|_| {}),
    };

    handle_server_message_for_tests(json, &handlers);
    assert!(alerted.load(Ordering::Relaxed));
}

#[test]
fn unrelated_text_part_does_not_alert() {
    let json = "{\"serverContent\":{\"modelTurn\":{\"parts\":[{\"text\":\"still on hold\"}]}}}";
    let handlers = SessionHandlers {
        on_audio: Box::new(|_, _| {}),
        on_alert: Box::new(|| panic!("unexpected alert")),
        on_close: Box::new(|_| {}),
    };
    handle_server_message_for_tests(json, &handlers);
}

#[test]
fn malformed_inbound_payload_is_dropped_not_fatal() {
    let json = "{\"serverContent\":{\"modelTurn\":{\"parts\":[{\"inlineData\":{\"data\":\"!!not-base64!!\"}}]}}}";
    let handlers = SessionHandlers {
        on_audio: Box::new(|_, _| panic!("bad segment must not reach playback")),
        on_alert: Box::new(|| {}),
        on_close: Box::new(|_| {}),
    };
    handle_server_message_for_tests(json, &handlers);
}

#[test]
fn setup_complete_message_is_quietly_consumed() {
    let handlers = noop_handlers();
    handle_server_message_for_tests("{\"setupComplete\":{}}", &handlers);
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
    opened: AtomicUsize,
    fail: AtomicBool,
    directives: Mutex<Vec<String>>,
    connections: Mutex<Vec<Arc<AtomicBool>>>,
}

impl LiveConnector for FakeConnector {
    fn open(
        &self,
        _config: &SessionConfig,
        directive: &str,
        _outbound: Arc<OutboundLink>,
        _handlers: SessionHandlers,
    ) -> Result<Box<dyn LiveConnection>, CallError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(CallError::ConnectionFailed("refused".to_string()));
        }
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.directives.lock().unwrap().push(directive.to_string());
        let closed = Arc::new(AtomicBool::new(false));
        self.connections.lock().unwrap().push(closed.clone());
        Ok(Box::new(FakeConnection { closed }))
    }
}

#[test]
fn session_manager_closes_prior_connection_on_reconnect() {
    let connector = Arc::new(FakeConnector::default());
    let mut manager = SessionManager::new(
        connector.clone(),
        SessionConfig::default(),
        Arc::new(OutboundLink::new()),
    );

    manager
        .connect(AgentMode::Casual, "", noop_handlers())
        .expect("first connect");
    manager
        .connect(AgentMode::Negotiate, "waive late fee", noop_handlers())
        .expect("second connect");

    assert_eq!(connector.opened.load(Ordering::Relaxed), 2);
    let connections = connector.connections.lock().unwrap();
    assert!(connections[0].load(Ordering::Relaxed), "first connection leaked");
    assert!(!connections[1].load(Ordering::Relaxed));

    let directives = connector.directives.lock().unwrap();
    assert!(directives[1].contains("waive late fee"));
}

#[test]
fn session_manager_disconnect_is_idempotent() {
    let connector = Arc::new(FakeConnector::default());
    let mut manager = SessionManager::new(
        connector.clone(),
        SessionConfig::default(),
        Arc::new(OutboundLink::new()),
    );

    manager.disconnect();
    assert!(!manager.is_connected());

    manager
        .connect(AgentMode::Monitor, "", noop_handlers())
        .expect("connect");
    assert!(manager.is_connected());
    manager.disconnect();
    manager.disconnect();
    assert!(!manager.is_connected());
    assert!(connector.connections.lock().unwrap()[0].load(Ordering::Relaxed));
}

#[test]
fn session_manager_clears_outbound_link_on_disconnect() {
    let connector = Arc::new(FakeConnector::default());
    let outbound = Arc::new(OutboundLink::new());
    let mut manager =
        SessionManager::new(connector, SessionConfig::default(), outbound.clone());

    manager
        .connect(AgentMode::Casual, "", noop_handlers())
        .expect("connect");
    let (tx, _rx) = tokio::sync::mpsc::channel::<String>(4);
    outbound.install(tx);
    assert!(outbound.is_open());

    manager.disconnect();
    assert!(!outbound.is_open());
}

#[test]
fn failed_connect_leaves_manager_disconnected() {
    let connector = Arc::new(FakeConnector::default());
    connector.fail.store(true, Ordering::Relaxed);
    let mut manager = SessionManager::new(
        connector,
        SessionConfig::default(),
        Arc::new(OutboundLink::new()),
    );

    let err = manager
        .connect(AgentMode::Negotiate, "", noop_handlers())
        .expect_err("connect must fail");
    assert!(matches!(err, CallError::ConnectionFailed(_)));
    assert!(!manager.is_connected());
}
