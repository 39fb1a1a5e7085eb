//! Sentinel Monitoring Core
//!
//! This crate implements the background multi-modal monitoring pipeline for
//! the sentinel daemon: a single worker that pulls frames from a camera,
//! detects motion against an adaptive background model, decides under rate
//! limits when to invoke the (expensive) inference and speech-transcription
//! services, and stores every derived artifact encrypted.
//!
//! # Architecture
//!
//! ```text
//! CameraSource -> MovementDetector -> SecureStore (encrypted event)
//!                       |
//!                 AnalysisThrottle
//!                  /           \
//!        AudioChannel        InferenceService
//!        (transcribe)          (chat)
//!                  \           /
//!               SecureStore (encrypted analysis record)
//! ```
//!
//! Design rules the implementation holds to:
//!
//! 1. **One worker per session.** The camera and audio handles belong to the
//!    monitoring worker for the session's lifetime; nothing else captures.
//! 2. **Capture never blocks on the network.** Only the throttled inference
//!    and transcription calls may, so slow services cannot stall capture.
//! 3. **Transient failures stay in the loop.** A bad frame, an unreachable
//!    service, or a corrupt stored record never terminates the worker.
//! 4. **Artifacts rest encrypted.** Movement events and analysis records
//!    only enter the store as authenticated ciphertext; raw frames are
//!    never persisted.
//!
//! # Module Structure
//!
//! - `capture`: frames and camera sources
//! - `detect`: adaptive background model, regions, movement history
//! - `audio`: microphone ring buffer, level metering, transcription
//! - `privacy`: password-derived codec and the encrypted store
//! - `throttle`: timing policy for the gated expensive calls
//! - `infer`: inference capability and backends
//! - `supervisor`: the session state machine and worker loop
//! - `api`: loopback HTTP surface for the surrounding web layer
//! - `config`: file + environment configuration

use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod audio;
pub mod capture;
pub mod config;
pub mod detect;
pub mod infer;
pub mod privacy;
pub mod supervisor;
pub mod throttle;

pub use audio::{
    AudioChannel, AudioConfig, AudioSummary, HttpTranscriber, StubTranscriber,
    TranscriptionBackend, TranscriptionResult,
};
pub use capture::{CameraConfig, CameraDevice, CameraInfo, CameraSource, Frame};
pub use config::SentinelConfig;
pub use detect::{
    DetectorConfig, HistorySummary, MovementDetector, MovementEvent, MovementHistory,
    MovementOutcome, MovementRegion, MovementSummary,
};
pub use infer::{ChatOptions, ChatReply, InferenceService, OllamaClient, StubInference};
pub use privacy::{storage_key, EncryptionCodec, Payload, SecureStore};
pub use supervisor::{
    AnalysisEntry, AnalysisRecord, CurrentFrame, EncryptionStatus, MonitorConfig,
    MonitoringSupervisor, StartOutcome, Statistics, StopOutcome,
};
pub use throttle::{AnalysisThrottle, ThrottleDecision};

/// Milliseconds since the Unix epoch. Falls back to zero only when the
/// system clock is before the epoch, which keeps capture paths infallible.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lock a mutex, recovering the guard when a panicking holder poisoned it.
/// Counters and rings stay usable after a worker panic; the data they hold
/// is monotonic or bounded, never structurally broken mid-update.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
