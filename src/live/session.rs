//! Streaming session lifecycle.
//!
//! One websocket connection at a time carries the engaged-agent leg of a
//! call. A dedicated thread runs a small tokio runtime for the socket; the
//! capture pump reaches it through `OutboundLink` without blocking.

use super::directive::{build_directive, AgentMode, ALERT_PHRASE};
use super::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};
use crate::audio::{decode_base64, PLAYBACK_RATE};
use crate::config::SessionConfig;
use crate::error::CallError;
use crate::log_debug;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Handoff point between the capture pump and the session thread. Frames
/// forwarded while no connection is open are discarded, not queued.
pub struct OutboundLink {
    sender: Mutex<Option<tokio_mpsc::Sender<String>>>,
    dropped: AtomicUsize,
}

impl OutboundLink {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.guard().is_some()
    }

    /// Forward one encoded frame to the open connection. Dropped silently
    /// when the link is closed or the session thread is backed up.
    pub fn forward(&self, frame: String) {
        let guard = self.guard();
        match guard.as_ref() {
            Some(sender) => {
                if sender.try_send(frame).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn install(&self, sender: tokio_mpsc::Sender<String>) {
        *self.guard() = Some(sender);
    }

    pub(crate) fn clear(&self) {
        *self.guard() = None;
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Option<tokio_mpsc::Sender<String>>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for OutboundLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Callbacks a connection invokes from its session thread.
pub struct SessionHandlers {
    /// Decoded inbound audio segment plus its playback duration.
    pub on_audio: Box<dyn Fn(Vec<f32>, Duration) + Send + Sync>,
    /// The agent spoke the alert phrase.
    pub on_alert: Box<dyn Fn() + Send + Sync>,
    /// The connection ended, normally or with an error.
    pub on_close: Box<dyn Fn(Option<String>) + Send + Sync>,
}

/// One open streaming connection. Closing is idempotent.
pub trait LiveConnection: Send {
    fn close(&mut self);
}

/// Connection factory seam so call control can run against a fake transport
/// in tests.
pub trait LiveConnector: Send + Sync {
    fn open(
        &self,
        config: &SessionConfig,
        directive: &str,
        outbound: Arc<OutboundLink>,
        handlers: SessionHandlers,
    ) -> Result<Box<dyn LiveConnection>, CallError>;
}

/// Owns at most one live connection and the outbound link it feeds.
pub struct SessionManager {
    connector: Arc<dyn LiveConnector>,
    config: SessionConfig,
    outbound: Arc<OutboundLink>,
    current: Option<Box<dyn LiveConnection>>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        config: SessionConfig,
        outbound: Arc<OutboundLink>,
    ) -> Self {
        Self {
            connector,
            config,
            outbound,
            current: None,
        }
    }

    /// Open a connection with the directive derived from `mode` and `goal`.
    /// Any prior connection is closed first, so at most one is ever alive.
    pub fn connect(
        &mut self,
        mode: AgentMode,
        goal: &str,
        handlers: SessionHandlers,
    ) -> Result<(), CallError> {
        self.disconnect();
        let directive = build_directive(mode, goal);
        let connection =
            self.connector
                .open(&self.config, &directive, self.outbound.clone(), handlers)?;
        self.current = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    /// Handle the audio pipeline uses to reach the open connection.
    pub fn outbound(&self) -> Arc<OutboundLink> {
        self.outbound.clone()
    }

    /// Close the current connection if any. Idempotent; never touches the
    /// audio pipeline.
    pub fn disconnect(&mut self) {
        self.outbound.clear();
        if let Some(mut connection) = self.current.take() {
            connection.close();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Production connector over tokio-tungstenite. Each connection runs on its
/// own thread with a current-thread runtime; the socket never migrates.
#[derive(Debug, Default)]
pub struct TungsteniteConnector;

impl LiveConnector for TungsteniteConnector {
    fn open(
        &self,
        config: &SessionConfig,
        directive: &str,
        outbound: Arc<OutboundLink>,
        handlers: SessionHandlers,
    ) -> Result<Box<dyn LiveConnection>, CallError> {
        let endpoint = if config.api_key.is_empty() {
            config.endpoint.clone()
        } else {
            format!("{}?key={}", config.endpoint, config.api_key)
        };
        let setup = serde_json::to_string(&SetupMessage::new(config, directive))
            .map_err(|err| CallError::ConnectionFailed(err.to_string()))?;

        let (frame_tx, frame_rx) = tokio_mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let handle = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = ready_tx.send(Err(format!("failed to build runtime: {err}")));
                    return;
                }
            };
            runtime.block_on(run_session(
                endpoint, setup, frame_rx, stop_rx, ready_tx, handlers,
            ));
        });

        match ready_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = handle.join();
                return Err(CallError::ConnectionFailed(message));
            }
            Err(_) => {
                return Err(CallError::ConnectionFailed(
                    "connection attempt timed out".to_string(),
                ));
            }
        }

        outbound.install(frame_tx);
        Ok(Box::new(WsConnection {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            outbound,
        }))
    }
}

struct WsConnection {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    outbound: Arc<OutboundLink>,
}

impl LiveConnection for WsConnection {
    fn close(&mut self) {
        self.outbound.clear();
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_session(
    endpoint: String,
    setup: String,
    mut frame_rx: tokio_mpsc::Receiver<String>,
    mut stop_rx: oneshot::Receiver<()>,
    ready_tx: mpsc::Sender<Result<(), String>>,
    handlers: SessionHandlers,
) {
    let (mut ws, _response) = match connect_async(&endpoint).await {
        Ok(ok) => ok,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("connect failed: {err}")));
            return;
        }
    };
    if let Err(err) = ws.send(Message::Text(setup)).await {
        let _ = ready_tx.send(Err(format!("setup send failed: {err}")));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    log_debug("live_session: connected");

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                let _ = ws.close(None).await;
                (handlers.on_close)(None);
                break;
            }
            maybe_frame = frame_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        let message = RealtimeInputMessage::audio_frame(frame);
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(err) => {
                                log_debug(&format!("live_session: frame encode failed: {err}"));
                                continue;
                            }
                        };
                        if let Err(err) = ws.send(Message::Text(text)).await {
                            (handlers.on_close)(Some(format!("send failed: {err}")));
                            break;
                        }
                    }
                    None => {
                        let _ = ws.close(None).await;
                        (handlers.on_close)(None);
                        break;
                    }
                }
            }
            maybe_msg = ws.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_server_message(&text, &handlers);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        // Some hosts deliver the JSON frames as binary.
                        if let Ok(text) = String::from_utf8(bytes) {
                            handle_server_message(&text, &handlers);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        (handlers.on_close)(None);
                        break;
                    }
                    Some(Err(err)) => {
                        (handlers.on_close)(Some(err.to_string()));
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    log_debug("live_session: closed");
}

fn handle_server_message(text: &str, handlers: &SessionHandlers) {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            log_debug(&format!("live_session: unparseable server message: {err}"));
            return;
        }
    };
    if message.setup_complete.is_some() {
        log_debug("live_session: setup complete");
    }
    let Some(content) = message.server_content else {
        return;
    };
    let Some(turn) = content.model_turn else {
        return;
    };
    for part in turn.parts {
        if let Some(inline) = part.inline_data {
            match decode_base64(&inline.data) {
                Ok(samples) if !samples.is_empty() => {
                    let duration =
                        Duration::from_secs_f64(samples.len() as f64 / f64::from(PLAYBACK_RATE));
                    (handlers.on_audio)(samples, duration);
                }
                Ok(_) => {}
                Err(err) => {
                    // A bad segment is dropped; the session itself stays up.
                    log_debug(&format!("live_session: inbound decode failed: {err}"));
                }
            }
        }
        if let Some(text) = part.text {
            if text.to_lowercase().contains(&ALERT_PHRASE.to_lowercase()) {
                (handlers.on_alert)();
            }
        }
    }
}

#[cfg(test)]
pub(super) fn handle_server_message_for_tests(text: &str, handlers: &SessionHandlers) {
    handle_server_message(text, handlers);
}
