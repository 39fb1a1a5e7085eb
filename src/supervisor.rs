//! Monitoring supervisor.
//!
//! One supervisor owns one monitoring session at a time:
//!
//! ```text
//! IDLE --start_monitoring--> RUNNING --stop_monitoring--> STOPPING --> IDLE
//! ```
//!
//! While RUNNING, a single dedicated worker thread owns the camera and audio
//! handles and drives the cycle: capture -> detect -> (if detected) store
//! encrypted event -> throttle gate -> transcription / inference -> store
//! encrypted analysis. Capture and detection never block on the network;
//! only the throttled inference and transcription calls may.
//!
//! Session state and counters live behind one mutex. The worker is the only
//! mutator; any other execution context may take a snapshot, so readers
//! never observe torn updates. All per-cycle transient failures are absorbed
//! inside the loop — a bad frame, a slow inference call, or a corrupted
//! stored record never terminates the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioChannel, TranscriptionResult};
use crate::capture::{CameraConfig, CameraInfo, CameraSource, Frame};
use crate::detect::{
    annotate_frame, DetectorConfig, HistorySummary, MovementDetector, MovementEvent,
    MovementHistory, MovementOutcome, MovementSummary,
};
use crate::infer::{ChatOptions, InferenceService};
use crate::lock_unpoisoned;
use crate::now_ms;
use crate::privacy::{storage_key, Payload, SecureStore};
use crate::throttle::AnalysisThrottle;

const MOVEMENT_KEY_PREFIX: &str = "movement_";
const ANALYSIS_KEY_PREFIX: &str = "analysis_";

/// Supervisor timing and pipeline tuning.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub detector: DetectorConfig,
    /// Minimum spacing between inference calls.
    pub analysis_interval: Duration,
    /// Minimum spacing between transcription calls.
    pub transcription_interval: Duration,
    /// How much trailing audio each transcription covers.
    pub transcription_window: Duration,
    /// Sleep between cycles to bound CPU usage.
    pub cycle_delay: Duration,
    /// Sleep before retrying after a failed capture.
    pub idle_retry_delay: Duration,
    /// How long `stop_monitoring` waits for the worker to exit.
    pub stop_timeout: Duration,
    /// Minimum spacing between cached-frame refreshes.
    pub frame_refresh: Duration,
    pub jpeg_quality: u8,
    pub chat: ChatOptions,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            analysis_interval: Duration::from_secs(2),
            transcription_interval: Duration::from_secs(5),
            transcription_window: Duration::from_secs(5),
            cycle_delay: Duration::from_millis(50),
            idle_retry_delay: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
            frame_refresh: Duration::from_millis(200),
            jpeg_quality: 85,
            chat: ChatOptions::default(),
        }
    }
}

/// Result of `start_monitoring`.
#[derive(Debug)]
pub enum StartOutcome {
    Started {
        camera: CameraInfo,
        audio_enabled: bool,
    },
    /// A session is already running; no side effects.
    AlreadyMonitoring,
    /// The camera could not be acquired; state stays IDLE.
    CameraUnavailable {
        error: String,
        troubleshooting: Vec<String>,
    },
    Error {
        reason: String,
    },
}

/// Result of `stop_monitoring`.
#[derive(Debug)]
pub enum StopOutcome {
    Stopped {
        stats: Statistics,
        /// True when the worker missed the join deadline and resources were
        /// force-released.
        forced_release: bool,
    },
    /// No session was running; no side effects.
    NotMonitoring,
}

/// Atomic snapshot of session counters and channel health.
#[derive(Clone, Debug, Serialize)]
pub struct Statistics {
    pub running: bool,
    pub started_at_ms: Option<u64>,
    pub frames_total: u64,
    pub movements_detected: u64,
    pub analyses_run: u64,
    pub transcriptions_run: u64,
    pub camera_active: bool,
    pub audio_recording: bool,
    pub audio_level: f32,
    pub audio_buffered_seconds: f64,
    pub last_transcript: Option<String>,
    pub movement: HistorySummary,
}

/// Analysis artifact persisted (encrypted) per inference call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub timestamp_ms: u64,
    pub movement: MovementFigures,
    pub transcript: Option<String>,
    pub analysis: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovementFigures {
    pub region_count: usize,
    pub intensity: f64,
}

/// Current-frame payload for the frame endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct CurrentFrame {
    /// Hex-encoded JPEG, or an encrypted blob when `encrypted` is set.
    pub image: String,
    pub encrypted: bool,
    pub annotated: bool,
    pub timestamp_ms: u64,
}

/// One stored analysis, decrypted or as raw ciphertext.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum AnalysisEntry {
    Decrypted {
        key: String,
        record: serde_json::Value,
    },
    Encrypted {
        key: String,
        ciphertext: String,
    },
}

/// Encryption posture report for the status endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct EncryptionStatus {
    pub algorithm: &'static str,
    pub kdf: String,
    pub key_count: usize,
    pub privacy_notes: Vec<&'static str>,
}

/// On-demand analysis result (unencrypted, returned to the caller only).
#[derive(Clone, Debug, Serialize)]
pub struct SituationAnalysis {
    pub timestamp_ms: u64,
    pub movement: Option<MovementEvent>,
    pub transcript: Option<String>,
    pub analysis: String,
}

#[derive(Default)]
struct SessionState {
    running: bool,
    started_at_ms: Option<u64>,
    frames_total: u64,
    movements_detected: u64,
    analyses_run: u64,
    transcriptions_run: u64,
    last_analysis: Option<Instant>,
    last_transcription: Option<Instant>,
    last_transcript: Option<String>,
    audio_enabled: bool,
    last_frame: Option<FrameSnapshot>,
}

#[derive(Clone)]
struct FrameSnapshot {
    jpeg: Vec<u8>,
    annotated_jpeg: Option<Vec<u8>>,
    timestamp_ms: u64,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

pub struct MonitoringSupervisor {
    config: MonitorConfig,
    camera_config: CameraConfig,
    camera: Arc<Mutex<CameraSource>>,
    audio: Arc<Mutex<AudioChannel>>,
    history: Arc<Mutex<MovementHistory>>,
    store: Arc<SecureStore>,
    inference: Arc<dyn InferenceService>,
    throttle: AnalysisThrottle,
    state: Arc<Mutex<SessionState>>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl MonitoringSupervisor {
    pub fn new(
        config: MonitorConfig,
        camera_config: CameraConfig,
        audio: AudioChannel,
        store: Arc<SecureStore>,
        inference: Arc<dyn InferenceService>,
    ) -> Result<Self> {
        let camera = CameraSource::new(camera_config.clone())?;
        let history = Arc::new(Mutex::new(MovementHistory::new(
            config.detector.history_capacity,
        )));
        let throttle = AnalysisThrottle::new(config.analysis_interval, config.transcription_interval);
        Ok(Self {
            config,
            camera_config,
            camera: Arc::new(Mutex::new(camera)),
            audio: Arc::new(Mutex::new(audio)),
            history,
            store,
            inference,
            throttle,
            state: Arc::new(Mutex::new(SessionState::default())),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// IDLE -> RUNNING. Acquires the camera (and audio when requested),
    /// resets per-session state, and spawns the worker. Fails fast with a
    /// diagnostic outcome when the camera cannot be acquired.
    pub fn start_monitoring(&self, camera_index: Option<u32>, enable_audio: bool) -> StartOutcome {
        let mut worker_slot = lock_unpoisoned(&self.worker);
        if worker_slot.is_some() {
            return StartOutcome::AlreadyMonitoring;
        }

        if let Some(index) = camera_index {
            let mut switched = self.camera_config.clone();
            if !switched.device.starts_with("stub://") {
                switched.device = format!("/dev/video{}", index);
            }
            match CameraSource::new(switched) {
                Ok(camera) => *lock_unpoisoned(&self.camera) = camera,
                Err(err) => {
                    return StartOutcome::CameraUnavailable {
                        error: err.to_string(),
                        troubleshooting: vec![],
                    }
                }
            }
        }

        let camera_info = {
            let mut camera = lock_unpoisoned(&self.camera);
            if let Err(err) = camera.start() {
                return StartOutcome::CameraUnavailable {
                    error: err.to_string(),
                    troubleshooting: camera_troubleshooting(camera.device()),
                };
            }
            camera.info()
        };

        let audio_enabled = if enable_audio {
            lock_unpoisoned(&self.audio).start_recording()
        } else {
            false
        };

        // Fresh session: history and state are recreated, the background
        // model starts a new seeding phase.
        lock_unpoisoned(&self.history).clear();
        let detector = MovementDetector::with_history(
            self.config.detector.clone(),
            Arc::clone(&self.history),
        );
        {
            let mut state = lock_unpoisoned(&self.state);
            *state = SessionState {
                running: true,
                started_at_ms: Some(now_ms()),
                audio_enabled,
                ..SessionState::default()
            };
        }
        self.stop.store(false, Ordering::SeqCst);

        let (done_tx, done_rx) = mpsc::channel();
        let ctx = WorkerContext {
            camera: Arc::clone(&self.camera),
            audio: Arc::clone(&self.audio),
            detector,
            history: Arc::clone(&self.history),
            store: Arc::clone(&self.store),
            inference: Arc::clone(&self.inference),
            throttle: self.throttle,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            stop: Arc::clone(&self.stop),
            done_tx,
        };
        let join = match std::thread::Builder::new()
            .name("sentinel-monitor".to_string())
            .spawn(move || run_worker(ctx))
        {
            Ok(join) => join,
            Err(err) => {
                lock_unpoisoned(&self.camera).stop();
                lock_unpoisoned(&self.audio).stop_recording();
                lock_unpoisoned(&self.state).running = false;
                return StartOutcome::Error {
                    reason: format!("failed to spawn monitoring worker: {}", err),
                };
            }
        };
        *worker_slot = Some(WorkerHandle { join, done_rx });

        log::info!(
            "monitoring started (camera={}, audio={})",
            camera_info.device,
            audio_enabled
        );
        StartOutcome::Started {
            camera: camera_info,
            audio_enabled,
        }
    }

    /// RUNNING -> STOPPING -> IDLE. Sets the stop flag and joins the worker
    /// with a bounded timeout; on timeout, resources are force-released and
    /// the anomaly is logged, but the stop still reports the final stats.
    pub fn stop_monitoring(&self) -> StopOutcome {
        let mut worker_slot = lock_unpoisoned(&self.worker);
        let Some(handle) = worker_slot.take() else {
            return StopOutcome::NotMonitoring;
        };

        self.stop.store(true, Ordering::SeqCst);
        let forced_release = match handle.done_rx.recv_timeout(self.config.stop_timeout) {
            Ok(()) => {
                let _ = handle.join.join();
                false
            }
            Err(_) => {
                log::warn!(
                    "monitoring worker missed the {}s stop deadline; force-releasing resources",
                    self.config.stop_timeout.as_secs()
                );
                if let Ok(mut camera) = self.camera.try_lock() {
                    camera.stop();
                }
                if let Ok(mut audio) = self.audio.try_lock() {
                    audio.stop_recording();
                }
                lock_unpoisoned(&self.state).running = false;
                // The detached worker exits at its next stop-flag check.
                true
            }
        };

        let stats = self.statistics();
        log::info!(
            "monitoring stopped (frames={}, movements={}, analyses={})",
            stats.frames_total,
            stats.movements_detected,
            stats.analyses_run
        );
        StopOutcome::Stopped {
            stats,
            forced_release,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock_unpoisoned(&self.state).running
    }

    /// Latest cached frame, optionally annotated and/or encrypted. `None`
    /// until the worker has cached a frame.
    pub fn current_frame(&self, encrypted: bool, annotated: bool) -> Option<CurrentFrame> {
        let snapshot = lock_unpoisoned(&self.state).last_frame.clone()?;
        let (bytes, is_annotated) = match (annotated, snapshot.annotated_jpeg) {
            (true, Some(annotated_jpeg)) => (annotated_jpeg, true),
            _ => (snapshot.jpeg, false),
        };
        let image = if encrypted {
            match self.store.codec().encrypt(&Payload::Binary(bytes)) {
                Ok(blob) => blob,
                Err(err) => {
                    log::error!("frame encryption failed: {}", err);
                    return None;
                }
            }
        } else {
            hex::encode(bytes)
        };
        Some(CurrentFrame {
            image,
            encrypted,
            annotated: is_annotated,
            timestamp_ms: snapshot.timestamp_ms,
        })
    }

    /// Most recent movement summaries, oldest first.
    pub fn movement_history(&self, limit: usize) -> Vec<MovementSummary> {
        lock_unpoisoned(&self.history).recent(limit)
    }

    /// Most recent stored analyses, newest first.
    pub fn movement_analysis(&self, limit: usize, decrypt: bool) -> Vec<AnalysisEntry> {
        let mut keys = self.store.keys_with_prefix(ANALYSIS_KEY_PREFIX);
        keys.reverse();
        keys.truncate(limit);

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if decrypt {
                if let Some(Payload::Structured(record)) = self.store.retrieve(&key, true) {
                    entries.push(AnalysisEntry::Decrypted { key, record });
                }
            } else if let Some(ciphertext) = self.store.ciphertext(&key) {
                entries.push(AnalysisEntry::Encrypted { key, ciphertext });
            }
        }
        entries
    }

    /// Stored movement event keys, newest first.
    pub fn movement_event_keys(&self, limit: usize) -> Vec<String> {
        let mut keys = self.store.keys_with_prefix(MOVEMENT_KEY_PREFIX);
        keys.reverse();
        keys.truncate(limit);
        keys
    }

    /// Snapshot of all counters. Taken under the session mutex, so values
    /// are mutually consistent and never torn mid-update.
    pub fn statistics(&self) -> Statistics {
        let (running, started_at_ms, frames, movements, analyses, transcriptions, transcript) = {
            let state = lock_unpoisoned(&self.state);
            (
                state.running,
                state.started_at_ms,
                state.frames_total,
                state.movements_detected,
                state.analyses_run,
                state.transcriptions_run,
                state.last_transcript.clone(),
            )
        };
        let camera_active = lock_unpoisoned(&self.camera).is_active();
        let audio = lock_unpoisoned(&self.audio).summary();
        Statistics {
            running,
            started_at_ms,
            frames_total: frames,
            movements_detected: movements,
            analyses_run: analyses,
            transcriptions_run: transcriptions,
            camera_active,
            audio_recording: audio.recording,
            audio_level: audio.level,
            audio_buffered_seconds: audio.buffered_seconds,
            last_transcript: transcript,
            movement: lock_unpoisoned(&self.history).summary(),
        }
    }

    pub fn encryption_status(&self) -> EncryptionStatus {
        EncryptionStatus {
            algorithm: crate::privacy::AEAD_ALG,
            kdf: format!(
                "{} ({} iterations)",
                crate::privacy::KDF_ALG,
                crate::privacy::KDF_ITERATIONS
            ),
            key_count: self.store.len(),
            privacy_notes: vec![
                "movement events and analysis records are encrypted at rest",
                "raw frames are never persisted",
                "transcription and inference calls may leave this host; point them at local services for full privacy",
            ],
        }
    }

    /// One-shot situation analysis while IDLE: warm a throwaway detector on
    /// a short frame burst, detect on the final frame, transcribe if audio
    /// is live, and call inference synchronously. The result is returned
    /// unencrypted to the caller and not stored.
    ///
    /// Refused while a session is running — the worker owns the camera.
    pub fn analyze_now(&self) -> Result<SituationAnalysis> {
        if self.is_monitoring() {
            return Err(anyhow!(
                "monitoring is active; on-demand analysis would contend for the camera"
            ));
        }

        let mut camera = lock_unpoisoned(&self.camera);
        let was_active = camera.is_active();
        if !was_active {
            camera.start()?;
        }

        let mut detector = MovementDetector::new(self.config.detector.clone());
        let mut last_outcome = None;
        for _ in 0..=self.config.detector.warmup_frames {
            let Some(frame) = camera.capture_frame() else {
                std::thread::sleep(self.config.idle_retry_delay);
                continue;
            };
            last_outcome = Some(detector.detect(&frame));
            std::thread::sleep(self.config.cycle_delay);
        }
        if !was_active {
            camera.stop();
        }
        drop(camera);

        let movement = last_outcome
            .as_ref()
            .and_then(|outcome| outcome.event())
            .cloned();
        let transcript = {
            let mut audio = lock_unpoisoned(&self.audio);
            audio
                .transcribe_recent(self.config.transcription_window)
                .text()
                .map(str::to_string)
        };

        let history_summary = lock_unpoisoned(&self.history).summary();
        let prompt = match &movement {
            Some(event) => build_analysis_prompt(event, &history_summary, transcript.as_deref()),
            None => format!(
                "No movement is currently detected by the monitoring camera.{}\n\n\
                 Provide a one-sentence status assessment.",
                transcript
                    .as_deref()
                    .map(|t| format!("\n\nAudio context: \"{}\"", t))
                    .unwrap_or_default()
            ),
        };
        let reply = self.inference.chat(&prompt, &self.config.chat)?;

        Ok(SituationAnalysis {
            timestamp_ms: now_ms(),
            movement,
            transcript,
            analysis: reply.text,
        })
    }
}

impl Drop for MonitoringSupervisor {
    fn drop(&mut self) {
        let running = lock_unpoisoned(&self.worker).is_some();
        if running {
            self.stop_monitoring();
        }
    }
}

// ----------------------------------------------------------------------------
// Worker loop
// ----------------------------------------------------------------------------

struct WorkerContext {
    camera: Arc<Mutex<CameraSource>>,
    audio: Arc<Mutex<AudioChannel>>,
    detector: MovementDetector,
    history: Arc<Mutex<MovementHistory>>,
    store: Arc<SecureStore>,
    inference: Arc<dyn InferenceService>,
    throttle: AnalysisThrottle,
    config: MonitorConfig,
    state: Arc<Mutex<SessionState>>,
    stop: Arc<AtomicBool>,
    done_tx: mpsc::Sender<()>,
}

fn run_worker(mut ctx: WorkerContext) {
    let mut last_cache_refresh: Option<Instant> = None;

    while !ctx.stop.load(Ordering::SeqCst) {
        let frame = lock_unpoisoned(&ctx.camera).capture_frame();
        let Some(frame) = frame else {
            std::thread::sleep(ctx.config.idle_retry_delay);
            continue;
        };
        lock_unpoisoned(&ctx.state).frames_total += 1;

        let outcome = ctx.detector.detect(&frame);
        let mut annotated_frame = None;

        match &outcome {
            MovementOutcome::Detected(event) => {
                lock_unpoisoned(&ctx.state).movements_detected += 1;
                store_movement_event(&ctx.store, event);
                run_gated_analysis(&ctx, event);

                let mut copy = frame.clone();
                annotate_frame(&mut copy, event);
                annotated_frame = Some(copy);
            }
            MovementOutcome::NoMovement(_) | MovementOutcome::WarmingUp { .. } => {}
            MovementOutcome::Error { reason } => {
                log::debug!("frame skipped: {}", reason);
            }
        }

        let refresh_due = last_cache_refresh
            .map(|at| at.elapsed() >= ctx.config.frame_refresh)
            .unwrap_or(true);
        if refresh_due {
            refresh_frame_cache(&ctx, &frame, annotated_frame.as_ref());
            last_cache_refresh = Some(Instant::now());
        }

        std::thread::sleep(ctx.config.cycle_delay);
    }

    // Cycle boundary reached with the stop flag set: release resources and
    // mark the session idle before signalling the join.
    lock_unpoisoned(&ctx.camera).stop();
    lock_unpoisoned(&ctx.audio).stop_recording();
    lock_unpoisoned(&ctx.state).running = false;
    let _ = ctx.done_tx.send(());
}

fn store_movement_event(store: &SecureStore, event: &MovementEvent) {
    let key = storage_key("movement", event.timestamp_ms);
    match serde_json::to_value(event) {
        Ok(value) => {
            store.store(&key, &Payload::Structured(value));
        }
        Err(err) => log::error!("failed to serialize movement event: {}", err),
    }
}

/// Consult the throttle and run whichever gated actions it permits.
/// Both timestamps advance on attempt, so a failing service is retried no
/// faster than a succeeding one.
fn run_gated_analysis(ctx: &WorkerContext, event: &MovementEvent) {
    let now = Instant::now();
    let (last_analysis, last_transcription, audio_enabled) = {
        let state = lock_unpoisoned(&ctx.state);
        (
            state.last_analysis,
            state.last_transcription,
            state.audio_enabled,
        )
    };
    let decision = ctx.throttle.evaluate(last_analysis, last_transcription, now);

    if decision.run_transcription && audio_enabled {
        // Copy the samples out under the lock, then run the blocking
        // transcription without it, so status queries are never stalled
        // behind a slow speech service.
        let (samples, rate, transcriber) = {
            let mut audio = lock_unpoisoned(&ctx.audio);
            let samples = if audio.is_recording() {
                audio.recent_samples(ctx.config.transcription_window)
            } else {
                Vec::new()
            };
            (samples, audio.sample_rate(), audio.transcriber())
        };
        let result = if samples.is_empty() {
            TranscriptionResult::Unavailable
        } else {
            transcriber.transcribe(&samples, rate)
        };
        let mut state = lock_unpoisoned(&ctx.state);
        state.last_transcription = Some(Instant::now());
        match result {
            TranscriptionResult::Ok { text, .. } => {
                log::debug!("transcribed {} chars of audio context", text.len());
                state.transcriptions_run += 1;
                state.last_transcript = Some(text);
            }
            TranscriptionResult::Unavailable => {}
            TranscriptionResult::Error(reason) => {
                log::warn!("transcription failed: {}", reason);
            }
        }
    }

    if decision.run_analysis {
        let transcript = lock_unpoisoned(&ctx.state).last_transcript.clone();
        let history_summary = lock_unpoisoned(&ctx.history).summary();
        let prompt = build_analysis_prompt(event, &history_summary, transcript.as_deref());

        match ctx.inference.chat(&prompt, &ctx.config.chat) {
            Ok(reply) => {
                let record = AnalysisRecord {
                    timestamp_ms: now_ms(),
                    movement: MovementFigures {
                        region_count: event.region_count,
                        intensity: event.intensity,
                    },
                    transcript,
                    analysis: reply.text,
                };
                let key = storage_key("analysis", record.timestamp_ms);
                match serde_json::to_value(&record) {
                    Ok(value) => {
                        if ctx.store.store(&key, &Payload::Structured(value)) {
                            lock_unpoisoned(&ctx.state).analyses_run += 1;
                        }
                    }
                    Err(err) => log::error!("failed to serialize analysis record: {}", err),
                }
            }
            Err(err) => {
                log::warn!("inference unavailable, skipping this cycle's analysis: {}", err);
            }
        }
        lock_unpoisoned(&ctx.state).last_analysis = Some(Instant::now());
    }
}

fn refresh_frame_cache(ctx: &WorkerContext, frame: &Frame, annotated: Option<&Frame>) {
    let jpeg = match frame.encode_jpeg(ctx.config.jpeg_quality) {
        Ok(jpeg) => jpeg,
        Err(err) => {
            log::debug!("frame cache refresh skipped: {}", err);
            return;
        }
    };
    let annotated_jpeg = annotated.and_then(|f| f.encode_jpeg(ctx.config.jpeg_quality).ok());
    lock_unpoisoned(&ctx.state).last_frame = Some(FrameSnapshot {
        jpeg,
        annotated_jpeg,
        timestamp_ms: frame.timestamp_ms(),
    });
}

fn build_analysis_prompt(
    event: &MovementEvent,
    history: &HistorySummary,
    transcript: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Analyze the following movement detection data from a monitoring camera:\n\n\
         Current movement:\n\
         - Detected regions: {}\n\
         - Movement intensity: {}%\n\
         - Total area: {} pixels\n\n\
         Movement history:\n\
         - Total detections: {}\n\
         - Average intensity: {}%\n\
         - Max intensity: {}%",
        event.region_count,
        event.intensity,
        event.total_area,
        history.total_detections,
        history.average_intensity,
        history.max_intensity,
    );

    if let Some(text) = transcript {
        prompt.push_str(&format!(
            "\n\nAudio context (from microphone):\n\"{}\"\n\n\
             Consider the audio context when analyzing the movement.",
            text
        ));
    }

    prompt.push_str(
        "\n\nProvide a brief assessment:\n\
         1. Is this normal activity or unusual?\n\
         2. What type of movement pattern does this suggest?\n\
         3. Any recommendations?\n\n\
         Keep the response concise (2-3 sentences).",
    );
    prompt
}

fn camera_troubleshooting(device: &str) -> Vec<String> {
    let mut hints = Vec::new();
    if device.starts_with("stub://") {
        return hints;
    }
    match std::fs::metadata(device) {
        Ok(_metadata) => {
            hints.push(format!("device node {} exists", device));
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                hints.push(format!(
                    "device permissions: {:o}",
                    _metadata.permissions().mode() & 0o777
                ));
            }
            hints.push("check that this user is in the 'video' group".to_string());
            hints.push("check whether another process holds the device".to_string());
        }
        Err(_) => {
            hints.push(format!("device node {} not found", device));
            hints.push("list devices with: ls -l /dev/video*".to_string());
        }
    }
    hints
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioConfig, StubTranscriber};
    use crate::infer::StubInference;
    use crate::privacy::EncryptionCodec;

    fn test_supervisor(inference: Arc<StubInference>) -> MonitoringSupervisor {
        let config = MonitorConfig {
            analysis_interval: Duration::from_millis(200),
            transcription_interval: Duration::from_millis(300),
            cycle_delay: Duration::from_millis(10),
            frame_refresh: Duration::from_millis(50),
            ..MonitorConfig::default()
        };
        let camera_config = CameraConfig {
            device: "stub://test".to_string(),
            width: 320,
            height: 240,
            fps: 30,
        };
        let audio = AudioChannel::new(
            AudioConfig::default(),
            Arc::new(StubTranscriber::with_text("test phrase")),
        )
        .unwrap();
        let store = Arc::new(SecureStore::new(EncryptionCodec::from_password(
            "supervisor-test",
        )));
        MonitoringSupervisor::new(config, camera_config, audio, store, inference).unwrap()
    }

    #[test]
    fn double_start_is_rejected_without_side_effects() {
        let inference = Arc::new(StubInference::new("ok"));
        let supervisor = test_supervisor(Arc::clone(&inference));

        assert!(matches!(
            supervisor.start_monitoring(None, false),
            StartOutcome::Started { .. }
        ));
        let before = supervisor.statistics();
        assert!(before.running);

        assert!(matches!(
            supervisor.start_monitoring(None, false),
            StartOutcome::AlreadyMonitoring
        ));
        let after = supervisor.statistics();
        assert_eq!(after.started_at_ms, before.started_at_ms);
        assert!(after.running);

        supervisor.stop_monitoring();
    }

    #[test]
    fn stop_without_start_reports_not_monitoring() {
        let supervisor = test_supervisor(Arc::new(StubInference::new("ok")));
        assert!(matches!(
            supervisor.stop_monitoring(),
            StopOutcome::NotMonitoring
        ));
    }

    #[test]
    fn prompt_includes_movement_and_audio_context() {
        let event = MovementEvent {
            timestamp_ms: 0,
            regions: vec![],
            region_count: 2,
            total_area: 1234,
            intensity: 3.5,
            frame_width: 640,
            frame_height: 480,
            method: crate::detect::DetectionMethod::AdaptiveBackground,
        };
        let history = HistorySummary {
            total_detections: 7,
            average_intensity: 2.0,
            max_intensity: 5.0,
            min_intensity: 1.0,
            last_detection_ms: Some(1),
        };
        let prompt = build_analysis_prompt(&event, &history, Some("someone at the door"));
        assert!(prompt.contains("Detected regions: 2"));
        assert!(prompt.contains("Total detections: 7"));
        assert!(prompt.contains("someone at the door"));

        let silent = build_analysis_prompt(&event, &history, None);
        assert!(!silent.contains("Audio context"));
    }

    #[test]
    fn troubleshooting_hints_mention_missing_device() {
        let hints = camera_troubleshooting("/dev/video99");
        assert!(hints.iter().any(|h| h.contains("not found")));
    }
}
