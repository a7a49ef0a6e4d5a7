//! Per-call audio pipeline over CPAL.
//!
//! A dedicated capture thread owns the input stream (CPAL streams are not
//! `Send`) and reports readiness over a channel. Device callbacks hand fixed
//! blocks to a pump thread that meters, records, and forwards each block to
//! the streaming session. Inbound agent segments are queued to an optional
//! output stream and mixed into the same recording.

use super::dispatch::BlockDispatcher;
use super::meter::{level, VolumeMeter};
use super::pcm::{encode_base64, encode_pcm16};
use super::recorder::{RecordingArtifact, RecordingBuffer};
use super::resample::{convert_block_to_rate, resample_to_rate};
use super::{CAPTURE_RATE, PLAYBACK_RATE};
use crate::config::PipelineConfig;
use crate::error::CallError;
use crate::live::OutboundLink;
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::bounded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Agent loudness reported while a playback segment runs. The remote leg has
/// no microphone to measure, so the meter shows a synthetic plateau for the
/// segment's duration.
const SYNTHETIC_AGENT_LEVEL: f32 = 50.0;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on queued playback audio. If the output stream stops draining
/// (device lost mid-call) inbound segments keep arriving for the rest of the
/// call; overflow past the cap is dropped and counted, like a lagging block
/// consumer.
const PLAYBACK_QUEUE_MAX_SECONDS: usize = 10;

/// Counters collected over one call for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub blocks_processed: usize,
    pub blocks_dropped: usize,
}

/// Per-call audio surface: inbound playback and teardown.
pub trait CallAudio: Send + Sync {
    /// Route one decoded agent segment to the speakers and the recording.
    fn playback(&self, samples: Vec<f32>, duration: Duration);

    /// Stop capture, release the devices, and finalize the recording.
    /// Idempotent; later calls return no artifact.
    fn stop(&self) -> Result<Option<RecordingArtifact>, CallError>;

    fn metrics(&self) -> PipelineMetrics;
}

/// Factory seam so call control can run against fake audio in tests.
pub trait AudioSystem: Send + Sync {
    fn start(
        &self,
        config: &PipelineConfig,
        target: &str,
        meter: VolumeMeter,
        outbound: Arc<OutboundLink>,
        muted: Arc<AtomicBool>,
    ) -> Result<Arc<dyn CallAudio>, CallError>;
}

/// List input device names so the CLI can expose a selector.
pub fn list_input_devices() -> Result<Vec<String>, CallError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| CallError::DeviceUnavailable(err.to_string()))?;
    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Production audio system backed by the default CPAL host.
#[derive(Debug, Default)]
pub struct CpalAudioSystem;

impl AudioSystem for CpalAudioSystem {
    fn start(
        &self,
        config: &PipelineConfig,
        target: &str,
        meter: VolumeMeter,
        outbound: Arc<OutboundLink>,
        muted: Arc<AtomicBool>,
    ) -> Result<Arc<dyn CallAudio>, CallError> {
        let pipeline = CpalCallAudio::start(config, target, meter, outbound, muted)?;
        Ok(Arc::new(pipeline))
    }
}

struct PipelineThreads {
    capture_stop: Option<mpsc::Sender<()>>,
    capture_handle: Option<JoinHandle<()>>,
    pump_handle: Option<JoinHandle<()>>,
    output_stop: Option<mpsc::Sender<()>>,
    output_handle: Option<JoinHandle<()>>,
    agent_reset_handle: Option<JoinHandle<()>>,
}

pub struct CpalCallAudio {
    target: String,
    meter: VolumeMeter,
    recording: Arc<Mutex<RecordingBuffer>>,
    playback_queue: Arc<Mutex<VecDeque<f32>>>,
    output_rate: u32,
    agent_reset: Mutex<Option<mpsc::Sender<Instant>>>,
    playback_dropped: AtomicUsize,
    blocks_processed: Arc<AtomicUsize>,
    blocks_dropped: Arc<AtomicUsize>,
    stopped: AtomicBool,
    threads: Mutex<PipelineThreads>,
}

impl CpalCallAudio {
    fn start(
        config: &PipelineConfig,
        target: &str,
        meter: VolumeMeter,
        outbound: Arc<OutboundLink>,
        muted: Arc<AtomicBool>,
    ) -> Result<Self, CallError> {
        let block_samples = config.block_samples.max(1);
        let capacity = config.frame_channel_capacity.max(1);
        let (block_tx, block_rx) = bounded::<Vec<f32>>(capacity);
        let blocks_dropped = Arc::new(AtomicUsize::new(0));
        let blocks_processed = Arc::new(AtomicUsize::new(0));

        // Capture thread owns the input stream and reports the device rate
        // once the stream is playing.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();
        let (capture_stop_tx, capture_stop_rx) = mpsc::channel::<()>();
        let input_device = config.input_device.clone();
        let dropped_for_capture = blocks_dropped.clone();
        let capture_handle = thread::spawn(move || {
            run_capture_thread(
                input_device,
                block_samples,
                block_tx,
                dropped_for_capture,
                ready_tx,
                capture_stop_rx,
            );
        });

        let device_rate = match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(rate)) => rate,
            Ok(Err(message)) => {
                let _ = capture_handle.join();
                return Err(CallError::DeviceUnavailable(message));
            }
            Err(_) => {
                return Err(CallError::DeviceUnavailable(
                    "audio capture did not start in time".to_string(),
                ));
            }
        };

        let recording = Arc::new(Mutex::new(RecordingBuffer::new()));
        let pump_recording = recording.clone();
        let pump_meter = meter.clone();
        let pump_processed = blocks_processed.clone();
        let pump_handle = thread::spawn(move || {
            for block in block_rx.iter() {
                let block =
                    convert_block_to_rate(block, device_rate, CAPTURE_RATE, block_samples);
                if block.is_empty() {
                    continue;
                }
                pump_meter.set_user(level(&block));
                lock_unpoisoned(&pump_recording).append(encode_pcm16(&block));
                if !muted.load(Ordering::Relaxed) && outbound.is_open() {
                    outbound.forward(encode_base64(&block));
                }
                pump_processed.fetch_add(1, Ordering::Relaxed);
            }
            pump_meter.set_user(0.0);
        });

        // Playback is best effort: a missing output device degrades the call
        // to capture and recording only.
        let playback_queue = Arc::new(Mutex::new(VecDeque::new()));
        let (output_ready_tx, output_ready_rx) = mpsc::channel::<Result<u32, String>>();
        let (output_stop_tx, output_stop_rx) = mpsc::channel::<()>();
        let queue_for_output = playback_queue.clone();
        let output_handle = thread::spawn(move || {
            run_output_thread(queue_for_output, output_ready_tx, output_stop_rx);
        });
        let output_rate = match output_ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(rate)) => rate,
            Ok(Err(message)) => {
                log_debug(&format!("playback unavailable: {message}"));
                0
            }
            Err(_) => {
                log_debug("playback unavailable: output thread did not report readiness");
                0
            }
        };

        // One timer thread serves every playback segment; it exits when the
        // sender side is dropped at stop.
        let (agent_reset_tx, agent_reset_rx) = mpsc::channel::<Instant>();
        let reset_meter = meter.clone();
        let agent_reset_handle = thread::spawn(move || {
            run_agent_reset_thread(reset_meter, agent_reset_rx);
        });

        log_debug(&format!(
            "pipeline started: device_rate={device_rate}Hz block_samples={block_samples} output_rate={output_rate}Hz"
        ));

        Ok(Self {
            target: target.to_string(),
            meter,
            recording,
            playback_queue,
            output_rate,
            agent_reset: Mutex::new(Some(agent_reset_tx)),
            playback_dropped: AtomicUsize::new(0),
            blocks_processed,
            blocks_dropped,
            stopped: AtomicBool::new(false),
            threads: Mutex::new(PipelineThreads {
                capture_stop: Some(capture_stop_tx),
                capture_handle: Some(capture_handle),
                pump_handle: Some(pump_handle),
                output_stop: Some(output_stop_tx),
                output_handle: Some(output_handle),
                agent_reset_handle: Some(agent_reset_handle),
            }),
        })
    }
}

impl CallAudio for CpalCallAudio {
    fn playback(&self, samples: Vec<f32>, duration: Duration) {
        if self.stopped.load(Ordering::Relaxed) || samples.is_empty() {
            return;
        }

        // Agent audio joins the recording at the capture rate, in arrival
        // order alongside microphone blocks.
        let recorded = resample_to_rate(&samples, PLAYBACK_RATE, CAPTURE_RATE);
        lock_unpoisoned(&self.recording).append(encode_pcm16(&recorded));

        if self.output_rate > 0 {
            let queued = resample_to_rate(&samples, PLAYBACK_RATE, self.output_rate);
            let cap = self.output_rate as usize * PLAYBACK_QUEUE_MAX_SECONDS;
            let dropped = enqueue_bounded(&mut lock_unpoisoned(&self.playback_queue), queued, cap);
            if dropped > 0 {
                self.playback_dropped.fetch_add(dropped, Ordering::Relaxed);
            }
        }

        // Hold the synthetic agent level for the segment's duration; the
        // timer thread keeps the latest deadline, so a newer segment extends
        // the plateau instead of cutting it short.
        self.meter.set_agent(SYNTHETIC_AGENT_LEVEL);
        if let Some(reset) = lock_unpoisoned(&self.agent_reset).as_ref() {
            let _ = reset.send(Instant::now() + duration);
        }
    }

    fn stop(&self) -> Result<Option<RecordingArtifact>, CallError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }

        let mut threads = lock_unpoisoned(&self.threads);
        // Dropping the capture stream disconnects the block channel, which in
        // turn ends the pump thread.
        if let Some(stop) = threads.capture_stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = threads.capture_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = threads.pump_handle.take() {
            let _ = handle.join();
        }
        if let Some(stop) = threads.output_stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = threads.output_handle.take() {
            let _ = handle.join();
        }
        // Dropping the sender ends the timer thread's receive loop.
        lock_unpoisoned(&self.agent_reset).take();
        if let Some(handle) = threads.agent_reset_handle.take() {
            let _ = handle.join();
        }
        drop(threads);

        self.meter.reset();

        let metrics = self.metrics();
        log_debug(&format!(
            "pipeline stopped: blocks_processed={} blocks_dropped={} playback_samples_dropped={}",
            metrics.blocks_processed,
            metrics.blocks_dropped,
            self.playback_dropped.load(Ordering::Relaxed)
        ));

        let buffer = std::mem::take(&mut *lock_unpoisoned(&self.recording));
        if buffer.is_empty() {
            return Ok(None);
        }
        buffer.finalize(&self.target).map(Some)
    }

    fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Append samples up to `cap` queued entries; returns how many were dropped.
pub(super) fn enqueue_bounded(queue: &mut VecDeque<f32>, samples: Vec<f32>, cap: usize) -> usize {
    let room = cap.saturating_sub(queue.len());
    let dropped = samples.len().saturating_sub(room);
    queue.extend(samples.into_iter().take(room));
    dropped
}

/// Zero the agent meter once the latest reported deadline passes. Deadlines
/// only ever move later; the loop ends when the sender is dropped.
pub(super) fn run_agent_reset_thread(meter: VolumeMeter, deadlines: mpsc::Receiver<Instant>) {
    let mut deadline: Option<Instant> = None;
    loop {
        match deadline {
            None => match deadlines.recv() {
                Ok(next) => deadline = Some(next),
                Err(_) => break,
            },
            Some(due) => {
                let now = Instant::now();
                if due <= now {
                    meter.set_agent(0.0);
                    deadline = None;
                    continue;
                }
                match deadlines.recv_timeout(due - now) {
                    Ok(next) => deadline = Some(due.max(next)),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        meter.set_agent(0.0);
                        deadline = None;
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        }
    }
}

fn open_input_device(preferred: Option<&str>) -> Result<cpal::Device, String> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|err| format!("no input devices available: {err}"))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| format!("input device '{name}' not found"))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| "no default input device available".to_string()),
    }
}

fn run_capture_thread(
    input_device: Option<String>,
    block_samples: usize,
    block_tx: crossbeam_channel::Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    ready_tx: mpsc::Sender<Result<u32, String>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let device = match open_input_device(input_device.as_deref()) {
        Ok(device) => device,
        Err(message) => {
            let _ = ready_tx.send(Err(message));
            return;
        }
    };

    let default_config = match device.default_input_config() {
        Ok(config) => config,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("no default input config: {err}")));
            return;
        }
    };
    let format = default_config.sample_format();
    let device_config: StreamConfig = default_config.into();
    let device_rate = device_config.sample_rate.0;
    let channels = usize::from(device_config.channels.max(1));

    // Scale the block size to the device rate so each dispatched block
    // resamples to exactly `block_samples` at the capture rate.
    let device_block_samples =
        ((block_samples as u64 * u64::from(device_rate)) / u64::from(CAPTURE_RATE)).max(1) as usize;
    let dispatcher = Arc::new(Mutex::new(BlockDispatcher::new(
        device_block_samples,
        block_tx,
        dropped.clone(),
    )));

    let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));
    let stream = match format {
        SampleFormat::F32 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[f32], _| {
                    if let Ok(mut pump) = dispatcher.try_lock() {
                        pump.push(data, channels, |sample| sample);
                    } else {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[i16], _| {
                    if let Ok(mut pump) = dispatcher.try_lock() {
                        pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                    } else {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[u16], _| {
                    if let Ok(mut pump) = dispatcher.try_lock() {
                        pump.push(data, channels, |sample| {
                            (sample as f32 - 32_768.0) / 32_768.0
                        });
                    } else {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(format!("unsupported sample format: {other:?}")));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("failed to open input stream: {err}")));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(format!("failed to start input stream: {err}")));
        return;
    }
    let _ = ready_tx.send(Ok(device_rate));

    // Park until the call ends; the stream must stay alive on this thread.
    let _ = stop_rx.recv();
    if let Err(err) = stream.pause() {
        log_debug(&format!("failed to pause input stream: {err}"));
    }
}

fn run_output_thread(
    queue: Arc<Mutex<VecDeque<f32>>>,
    ready_tx: mpsc::Sender<Result<u32, String>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err("no default output device available".to_string()));
            return;
        }
    };
    let default_config = match device.default_output_config() {
        Ok(config) => config,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("no default output config: {err}")));
            return;
        }
    };
    if default_config.sample_format() != SampleFormat::F32 {
        let _ = ready_tx.send(Err(format!(
            "unsupported output sample format: {:?}",
            default_config.sample_format()
        )));
        return;
    }
    let device_config: StreamConfig = default_config.into();
    let output_rate = device_config.sample_rate.0;
    let channels = usize::from(device_config.channels.max(1));

    let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));
    let callback_queue = queue.clone();
    let stream = match device.build_output_stream(
        &device_config,
        move |data: &mut [f32], _| {
            let mut queue = callback_queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for frame in data.chunks_mut(channels) {
                let sample = queue.pop_front().unwrap_or(0.0);
                frame.fill(sample);
            }
        },
        err_fn,
        None,
    ) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("failed to open output stream: {err}")));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(format!("failed to start output stream: {err}")));
        return;
    }
    let _ = ready_tx.send(Ok(output_rate));

    let _ = stop_rx.recv();
    if let Err(err) = stream.pause() {
        log_debug(&format!("failed to pause output stream: {err}"));
    }
}
