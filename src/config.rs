use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioConfig, HttpTranscriber, StubTranscriber, TranscriptionBackend};
use crate::capture::CameraConfig;
use crate::detect::DetectorConfig;
use crate::infer::{ChatOptions, InferenceService, OllamaClient, StubInference};
use crate::supervisor::MonitorConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8686";
const DEFAULT_CAMERA_DEVICE: &str = "stub://scene";
const DEFAULT_AUDIO_DEVICE: &str = "stub://tone";
const DEFAULT_ANALYSIS_INTERVAL_MS: u64 = 2_000;
const DEFAULT_TRANSCRIPTION_INTERVAL_MS: u64 = 5_000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_INFERENCE_PROVIDER: &str = "ollama";
const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_INFERENCE_MODEL: &str = "llama3.1:8b";
const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TRANSCRIBE_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    audio: Option<AudioConfigFile>,
    detector: Option<DetectorConfigFile>,
    monitor: Option<MonitorConfigFile>,
    inference: Option<InferenceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AudioConfigFile {
    device: Option<String>,
    sample_rate: Option<u32>,
    buffer_seconds: Option<u32>,
    transcription_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    sensitivity: Option<u8>,
    min_area: Option<u64>,
    warmup_frames: Option<u32>,
    history_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    analysis_interval_ms: Option<u64>,
    transcription_interval_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    provider: Option<String>,
    url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub api_addr: String,
    pub api_token_path: Option<PathBuf>,
    pub camera: CameraConfig,
    pub audio: AudioConfig,
    /// Speech-to-text endpoint; transcription is disabled when absent.
    pub transcription_url: Option<String>,
    pub detector: DetectorConfig,
    pub analysis_interval: Duration,
    pub transcription_interval: Duration,
    pub stop_timeout: Duration,
    pub jpeg_quality: u8,
    pub inference: InferenceSettings,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub provider: String,
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl SentinelConfig {
    /// Load from the file named by SENTINEL_CONFIG (when set), then apply
    /// SENTINEL_* environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let api_token_path = file.api.and_then(|api| api.token_path);

        let camera_defaults = CameraConfig::default();
        let camera = CameraConfig {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(camera_defaults.width),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(camera_defaults.height),
            fps: file
                .camera
                .and_then(|camera| camera.fps)
                .unwrap_or(camera_defaults.fps),
        };

        let audio_defaults = AudioConfig::default();
        let audio = AudioConfig {
            device: file
                .audio
                .as_ref()
                .and_then(|audio| audio.device.clone())
                .unwrap_or_else(|| DEFAULT_AUDIO_DEVICE.to_string()),
            sample_rate: file
                .audio
                .as_ref()
                .and_then(|audio| audio.sample_rate)
                .unwrap_or(audio_defaults.sample_rate),
            buffer_seconds: file
                .audio
                .as_ref()
                .and_then(|audio| audio.buffer_seconds)
                .unwrap_or(audio_defaults.buffer_seconds),
        };
        let transcription_url = file.audio.and_then(|audio| audio.transcription_url);

        let detector_defaults = DetectorConfig::default();
        let detector = DetectorConfig {
            sensitivity: file
                .detector
                .as_ref()
                .and_then(|detector| detector.sensitivity)
                .unwrap_or(detector_defaults.sensitivity),
            min_area: file
                .detector
                .as_ref()
                .and_then(|detector| detector.min_area)
                .unwrap_or(detector_defaults.min_area),
            warmup_frames: file
                .detector
                .as_ref()
                .and_then(|detector| detector.warmup_frames)
                .unwrap_or(detector_defaults.warmup_frames),
            history_capacity: file
                .detector
                .and_then(|detector| detector.history_capacity)
                .unwrap_or(detector_defaults.history_capacity),
            ..detector_defaults
        };

        let analysis_interval = Duration::from_millis(
            file.monitor
                .as_ref()
                .and_then(|monitor| monitor.analysis_interval_ms)
                .unwrap_or(DEFAULT_ANALYSIS_INTERVAL_MS),
        );
        let transcription_interval = Duration::from_millis(
            file.monitor
                .as_ref()
                .and_then(|monitor| monitor.transcription_interval_ms)
                .unwrap_or(DEFAULT_TRANSCRIPTION_INTERVAL_MS),
        );
        let stop_timeout = Duration::from_millis(
            file.monitor
                .as_ref()
                .and_then(|monitor| monitor.stop_timeout_ms)
                .unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
        );
        let jpeg_quality = file
            .monitor
            .and_then(|monitor| monitor.jpeg_quality)
            .unwrap_or(DEFAULT_JPEG_QUALITY);

        let inference = InferenceSettings {
            provider: file
                .inference
                .as_ref()
                .and_then(|inference| inference.provider.clone())
                .unwrap_or_else(|| DEFAULT_INFERENCE_PROVIDER.to_string()),
            url: file
                .inference
                .as_ref()
                .and_then(|inference| inference.url.clone())
                .unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
            model: file
                .inference
                .as_ref()
                .and_then(|inference| inference.model.clone())
                .unwrap_or_else(|| DEFAULT_INFERENCE_MODEL.to_string()),
            temperature: file
                .inference
                .as_ref()
                .and_then(|inference| inference.temperature)
                .unwrap_or_else(|| ChatOptions::default().temperature),
            max_tokens: file
                .inference
                .as_ref()
                .and_then(|inference| inference.max_tokens)
                .unwrap_or_else(|| ChatOptions::default().max_tokens),
            timeout: Duration::from_millis(
                file.inference
                    .and_then(|inference| inference.timeout_ms)
                    .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_MS),
            ),
        };

        Self {
            api_addr,
            api_token_path,
            camera,
            audio,
            transcription_url,
            detector,
            analysis_interval,
            transcription_interval,
            stop_timeout,
            jpeg_quality,
            inference,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SENTINEL_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("SENTINEL_API_TOKEN_PATH") {
            if !path.trim().is_empty() {
                self.api_token_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(device) = std::env::var("SENTINEL_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(device) = std::env::var("SENTINEL_AUDIO_DEVICE") {
            if !device.trim().is_empty() {
                self.audio.device = device;
            }
        }
        if let Ok(url) = std::env::var("SENTINEL_TRANSCRIBE_URL") {
            if !url.trim().is_empty() {
                self.transcription_url = Some(url);
            }
        }
        if let Ok(provider) = std::env::var("SENTINEL_INFERENCE_PROVIDER") {
            if !provider.trim().is_empty() {
                self.inference.provider = provider;
            }
        }
        if let Ok(url) = std::env::var("SENTINEL_INFERENCE_URL") {
            if !url.trim().is_empty() {
                self.inference.url = url;
            }
        }
        if let Ok(model) = std::env::var("SENTINEL_INFERENCE_MODEL") {
            if !model.trim().is_empty() {
                self.inference.model = model;
            }
        }
        if let Ok(interval) = std::env::var("SENTINEL_ANALYSIS_INTERVAL_MS") {
            let ms: u64 = interval.parse().map_err(|_| {
                anyhow!("SENTINEL_ANALYSIS_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.analysis_interval = Duration::from_millis(ms);
        }
        if let Ok(interval) = std::env::var("SENTINEL_TRANSCRIPTION_INTERVAL_MS") {
            let ms: u64 = interval.parse().map_err(|_| {
                anyhow!(
                    "SENTINEL_TRANSCRIPTION_INTERVAL_MS must be an integer number of milliseconds"
                )
            })?;
            self.transcription_interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.analysis_interval.is_zero() {
            return Err(anyhow!("analysis interval must be greater than zero"));
        }
        if self.transcription_interval.is_zero() {
            return Err(anyhow!("transcription interval must be greater than zero"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("jpeg quality must be in 1..=100"));
        }
        if self.detector.min_area == 0 {
            return Err(anyhow!("detector min_area must be greater than zero"));
        }
        if self.detector.history_capacity == 0 {
            return Err(anyhow!("detector history_capacity must be greater than zero"));
        }
        match self.inference.provider.as_str() {
            "ollama" | "stub" => {}
            other => {
                return Err(anyhow!(
                    "unknown inference provider '{}'; expected 'ollama' or 'stub'",
                    other
                ))
            }
        }
        Ok(())
    }

    /// Supervisor timing settings derived from this config.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            detector: self.detector.clone(),
            analysis_interval: self.analysis_interval,
            transcription_interval: self.transcription_interval,
            stop_timeout: self.stop_timeout,
            jpeg_quality: self.jpeg_quality,
            chat: ChatOptions {
                temperature: self.inference.temperature,
                max_tokens: self.inference.max_tokens,
            },
            ..MonitorConfig::default()
        }
    }

    /// The inference backend, selected once here. Provider chains are not
    /// dispatched per call; the supervisor sees one `InferenceService`.
    pub fn build_inference(&self) -> Arc<dyn InferenceService> {
        match self.inference.provider.as_str() {
            "stub" => Arc::new(StubInference::new(
                "No anomalies detected; activity appears routine.",
            )),
            _ => Arc::new(OllamaClient::new(
                self.inference.url.clone(),
                self.inference.model.clone(),
                self.inference.timeout,
            )),
        }
    }

    /// The transcription backend; silent stub when no endpoint is set.
    pub fn build_transcriber(&self) -> Arc<dyn TranscriptionBackend> {
        match &self.transcription_url {
            Some(url) => Arc::new(HttpTranscriber::new(
                url.clone(),
                Duration::from_millis(DEFAULT_TRANSCRIBE_TIMEOUT_MS),
            )),
            None => Arc::new(StubTranscriber::silent()),
        }
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
