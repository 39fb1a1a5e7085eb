//! Audio channel.
//!
//! `AudioChannel` owns a microphone for the lifetime of a monitoring
//! session: it records into a bounded rolling sample ring, meters the
//! current level, and transcribes the most recent seconds on demand.
//!
//! Backends:
//! - `stub://` device names select a synthetic tone generator (tests, demo)
//! - any other name selects the system input device (feature: audio-cpal)
//!
//! Like the camera, the channel is owned by the monitoring worker while a
//! session runs; `transcribe_recent` is the one blocking, network-dependent
//! operation and is only ever invoked under the analysis throttle.

mod transcribe;

pub use transcribe::{
    encode_wav_pcm16, HttpTranscriber, StubTranscriber, TranscriptionBackend, TranscriptionResult,
};

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::lock_unpoisoned;

/// Configuration for an audio channel.
#[derive(Clone, Debug)]
pub struct AudioConfig {
    /// Input device name, or "stub://tone" for the synthetic backend.
    pub device: String,
    /// Preferred sample rate (Hz). Real devices may substitute their own.
    pub sample_rate: u32,
    /// Rolling buffer length in seconds.
    pub buffer_seconds: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: "stub://tone".to_string(),
            sample_rate: 16_000,
            buffer_seconds: 30,
        }
    }
}

/// Snapshot of the channel for statistics output.
#[derive(Clone, Debug, Serialize)]
pub struct AudioSummary {
    pub recording: bool,
    pub sample_rate: u32,
    pub buffered_seconds: f64,
    pub level: f32,
}

/// Bounded rolling ring of mono PCM16 samples.
struct SampleRing {
    samples: VecDeque<i16>,
    max_samples: usize,
}

impl SampleRing {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.min(1 << 20)),
            max_samples,
        }
    }

    fn push_slice(&mut self, chunk: &[i16]) {
        for &sample in chunk {
            if self.samples.len() >= self.max_samples {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    fn recent(&self, count: usize) -> Vec<i16> {
        let skip = self.samples.len().saturating_sub(count);
        self.samples.iter().skip(skip).copied().collect()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

pub struct AudioChannel {
    config: AudioConfig,
    ring: Arc<Mutex<SampleRing>>,
    backend: AudioBackend,
    transcriber: Arc<dyn TranscriptionBackend>,
    recording: bool,
    /// Actual capture rate; real devices may differ from the preferred rate.
    active_rate: u32,
}

enum AudioBackend {
    Synthetic(synthetic::SyntheticMic),
    #[cfg(feature = "audio-cpal")]
    Cpal(cpal_backend::CpalMic),
}

impl AudioChannel {
    pub fn new(config: AudioConfig, transcriber: Arc<dyn TranscriptionBackend>) -> Result<Self> {
        let max_samples = config.sample_rate as usize * config.buffer_seconds as usize;
        let ring = Arc::new(Mutex::new(SampleRing::new(max_samples)));
        let backend = if config.device.starts_with("stub://") {
            AudioBackend::Synthetic(synthetic::SyntheticMic::new(config.sample_rate))
        } else {
            #[cfg(feature = "audio-cpal")]
            {
                AudioBackend::Cpal(cpal_backend::CpalMic::new(config.device.clone()))
            }
            #[cfg(not(feature = "audio-cpal"))]
            {
                return Err(anyhow!(
                    "audio device '{}' requires the audio-cpal feature",
                    config.device
                ));
            }
        };
        Ok(Self {
            active_rate: config.sample_rate,
            config,
            ring,
            backend,
            transcriber,
            recording: false,
        })
    }

    /// Begin recording into the rolling buffer. Returns false when already
    /// recording or when the input device cannot be opened; an audio failure
    /// never prevents a monitoring session from starting.
    pub fn start_recording(&mut self) -> bool {
        if self.recording {
            return false;
        }
        lock_unpoisoned(&self.ring).clear();
        let started = match &mut self.backend {
            AudioBackend::Synthetic(mic) => {
                mic.start();
                self.active_rate = self.config.sample_rate;
                true
            }
            #[cfg(feature = "audio-cpal")]
            AudioBackend::Cpal(mic) => match mic.start(Arc::clone(&self.ring)) {
                Ok(rate) => {
                    self.active_rate = rate;
                    true
                }
                Err(err) => {
                    log::warn!("AudioChannel: failed to open input device: {}", err);
                    false
                }
            },
        };
        self.recording = started;
        started
    }

    /// Stop recording. Safe to call when recording never started.
    pub fn stop_recording(&mut self) {
        if !self.recording {
            return;
        }
        match &mut self.backend {
            AudioBackend::Synthetic(mic) => mic.stop(),
            #[cfg(feature = "audio-cpal")]
            AudioBackend::Cpal(mic) => mic.stop(),
        }
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn sample_rate(&self) -> u32 {
        self.active_rate
    }

    /// Shared handle to the transcription backend, so callers can run the
    /// blocking transcription outside any lock guarding this channel.
    pub fn transcriber(&self) -> Arc<dyn TranscriptionBackend> {
        Arc::clone(&self.transcriber)
    }

    /// Instantaneous input level, 0-100, from the most recent ~100ms.
    pub fn level(&mut self) -> f32 {
        self.pull_synthetic();
        let window = (self.active_rate / 10).max(1) as usize;
        let recent = lock_unpoisoned(&self.ring).recent(window);
        if recent.is_empty() {
            return 0.0;
        }
        let mean_square: f64 = recent
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum::<f64>()
            / recent.len() as f64;
        let rms = mean_square.sqrt();
        // Scaled up so quiet rooms still register visibly.
        ((rms / i16::MAX as f64) * 100.0 * 10.0).min(100.0) as f32
    }

    /// Copy of the last `duration` of samples, shorter when the buffer holds
    /// less than that.
    pub fn recent_samples(&mut self, duration: Duration) -> Vec<i16> {
        self.pull_synthetic();
        let count = (duration.as_secs_f64() * self.active_rate as f64) as usize;
        lock_unpoisoned(&self.ring).recent(count)
    }

    /// Transcribe the most recent `duration` of audio. Blocking and
    /// network-dependent; callers must gate this behind the throttle.
    pub fn transcribe_recent(&mut self, duration: Duration) -> TranscriptionResult {
        if !self.recording {
            return TranscriptionResult::Unavailable;
        }
        let samples = self.recent_samples(duration);
        if samples.is_empty() {
            return TranscriptionResult::Unavailable;
        }
        self.transcriber.transcribe(&samples, self.active_rate)
    }

    pub fn summary(&mut self) -> AudioSummary {
        let level = self.level();
        let buffered = lock_unpoisoned(&self.ring).len() as f64 / self.active_rate as f64;
        AudioSummary {
            recording: self.recording,
            sample_rate: self.active_rate,
            buffered_seconds: buffered,
            level,
        }
    }

    /// Write the last `duration` of audio to a WAV file.
    pub fn write_recent_wav(&mut self, path: &Path, duration: Duration) -> Result<()> {
        let samples = self.recent_samples(duration);
        if samples.is_empty() {
            return Err(anyhow!("no buffered audio to write"));
        }
        let wav = encode_wav_pcm16(&samples, self.active_rate);
        std::fs::write(path, wav)?;
        Ok(())
    }

    /// The synthetic backend generates samples on demand rather than from a
    /// device callback; real backends fill the ring themselves.
    fn pull_synthetic(&mut self) {
        if !self.recording {
            return;
        }
        if let AudioBackend::Synthetic(mic) = &mut self.backend {
            mic.fill(&self.ring);
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic microphone (stub://) for tests and the demo
// ----------------------------------------------------------------------------

mod synthetic {
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use super::SampleRing;
    use crate::lock_unpoisoned;

    const TONE_HZ: f64 = 440.0;
    const TONE_AMPLITUDE: f64 = 3200.0;
    /// Cap per-fill generation so a long-idle channel cannot stall a caller.
    const MAX_FILL_SAMPLES: usize = 1 << 18;

    /// Generates a steady tone, appended on demand for however much wall
    /// time elapsed since the previous fill.
    pub(super) struct SyntheticMic {
        sample_rate: u32,
        started: Option<Instant>,
        generated: u64,
    }

    impl SyntheticMic {
        pub(super) fn new(sample_rate: u32) -> Self {
            Self {
                sample_rate,
                started: None,
                generated: 0,
            }
        }

        pub(super) fn start(&mut self) {
            self.started = Some(Instant::now());
            self.generated = 0;
        }

        pub(super) fn stop(&mut self) {
            self.started = None;
        }

        pub(super) fn fill(&mut self, ring: &Arc<Mutex<SampleRing>>) {
            let Some(started) = self.started else {
                return;
            };
            let elapsed = started.elapsed().as_secs_f64();
            let target = (elapsed * self.sample_rate as f64) as u64;
            let missing = (target.saturating_sub(self.generated) as usize).min(MAX_FILL_SAMPLES);
            if missing == 0 {
                return;
            }

            let mut chunk = Vec::with_capacity(missing);
            for i in 0..missing {
                let n = self.generated + i as u64;
                let phase = (n as f64 / self.sample_rate as f64) * TONE_HZ * std::f64::consts::TAU;
                chunk.push((phase.sin() * TONE_AMPLITUDE) as i16);
            }
            self.generated += missing as u64;
            lock_unpoisoned(ring).push_slice(&chunk);
        }
    }
}

// ----------------------------------------------------------------------------
// Production microphone using cpal
// ----------------------------------------------------------------------------

#[cfg(feature = "audio-cpal")]
mod cpal_backend {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread::JoinHandle;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::SampleRing;
    use crate::lock_unpoisoned;

    /// Owns the capture stream on a dedicated thread (cpal streams are not
    /// Send, so the stream must live where it was built).
    pub(super) struct CpalMic {
        device_name: String,
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl CpalMic {
        pub(super) fn new(device_name: String) -> Self {
            Self {
                device_name,
                stop: Arc::new(AtomicBool::new(false)),
                thread: None,
            }
        }

        /// Open the input device and start pushing samples into the ring.
        /// Returns the device's actual sample rate.
        pub(super) fn start(&mut self, ring: Arc<Mutex<SampleRing>>) -> Result<u32> {
            self.stop.store(false, Ordering::SeqCst);
            let (rate_tx, rate_rx) = mpsc::channel::<Result<u32>>();
            let stop = Arc::clone(&self.stop);
            let device_name = self.device_name.clone();

            let thread = std::thread::Builder::new()
                .name("sentinel-audio".to_string())
                .spawn(move || run_capture(device_name, ring, stop, rate_tx))
                .map_err(|e| anyhow!("failed to spawn audio capture thread: {}", e))?;
            self.thread = Some(thread);

            match rate_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(Ok(rate)) => Ok(rate),
                Ok(Err(err)) => {
                    self.stop();
                    Err(err)
                }
                Err(_) => {
                    self.stop();
                    Err(anyhow!("audio capture thread did not report readiness"))
                }
            }
        }

        pub(super) fn stop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn run_capture(
        device_name: String,
        ring: Arc<Mutex<SampleRing>>,
        stop: Arc<AtomicBool>,
        rate_tx: mpsc::Sender<Result<u32>>,
    ) {
        let stream_and_rate = build_stream(&device_name, ring);
        match stream_and_rate {
            Ok((stream, rate)) => {
                if let Err(err) = stream.play() {
                    let _ = rate_tx.send(Err(anyhow!("failed to start audio stream: {}", err)));
                    return;
                }
                let _ = rate_tx.send(Ok(rate));
                while !stop.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                // Stream drops here, closing the device.
            }
            Err(err) => {
                let _ = rate_tx.send(Err(err));
            }
        }
    }

    fn build_stream(
        device_name: &str,
        ring: Arc<Mutex<SampleRing>>,
    ) -> Result<(cpal::Stream, u32)> {
        let host = cpal::default_host();
        let device = if device_name == "default" {
            host.default_input_device()
                .ok_or_else(|| anyhow!("no default input device"))?
        } else {
            host.input_devices()?
                .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{}' not found", device_name))?
        };

        let config = device.default_input_config()?;
        let rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let err_fn = |err| log::warn!("AudioChannel: stream error: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _| push_mono(&ring, data, channels),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    let converted: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    push_mono(&ring, &converted, channels)
                },
                err_fn,
                None,
            )?,
            other => return Err(anyhow!("unsupported input sample format {:?}", other)),
        };
        Ok((stream, rate))
    }

    /// Downmix interleaved channels to mono by taking the first channel.
    fn push_mono(ring: &Arc<Mutex<SampleRing>>, data: &[i16], channels: usize) {
        if channels <= 1 {
            lock_unpoisoned(ring).push_slice(data);
            return;
        }
        let mono: Vec<i16> = data.iter().step_by(channels).copied().collect();
        lock_unpoisoned(ring).push_slice(&mono);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_channel(transcriber: Arc<dyn TranscriptionBackend>) -> AudioChannel {
        AudioChannel::new(AudioConfig::default(), transcriber).unwrap()
    }

    #[test]
    fn recording_lifecycle_is_idempotent() {
        let mut channel = stub_channel(Arc::new(StubTranscriber::silent()));
        // Stop before start is a no-op.
        channel.stop_recording();
        assert!(!channel.is_recording());

        assert!(channel.start_recording());
        assert!(!channel.start_recording()); // already recording
        channel.stop_recording();
        channel.stop_recording();
        assert!(!channel.is_recording());
    }

    #[test]
    fn synthetic_backend_meters_nonzero_level() {
        let mut channel = stub_channel(Arc::new(StubTranscriber::silent()));
        assert_eq!(channel.level(), 0.0);

        channel.start_recording();
        std::thread::sleep(Duration::from_millis(120));
        assert!(channel.level() > 0.0);
        assert!(channel.level() <= 100.0);
    }

    #[test]
    fn transcription_requires_active_recording() {
        let mut channel = stub_channel(Arc::new(StubTranscriber::with_text("hello world")));
        assert_eq!(
            channel.transcribe_recent(Duration::from_secs(5)),
            TranscriptionResult::Unavailable
        );

        channel.start_recording();
        std::thread::sleep(Duration::from_millis(120));
        let result = channel.transcribe_recent(Duration::from_secs(5));
        assert_eq!(result.text(), Some("hello world"));
    }

    #[test]
    fn ring_is_bounded_by_buffer_seconds() {
        let config = AudioConfig {
            sample_rate: 1_000,
            buffer_seconds: 1,
            ..AudioConfig::default()
        };
        let mut channel =
            AudioChannel::new(config, Arc::new(StubTranscriber::silent())).unwrap();
        channel.start_recording();
        // Push far more than one second's worth directly.
        lock_unpoisoned(&channel.ring).push_slice(&vec![100i16; 5_000]);
        assert!(lock_unpoisoned(&channel.ring).len() <= 1_000);
    }

    #[test]
    fn wav_export_writes_file() {
        let mut channel = stub_channel(Arc::new(StubTranscriber::silent()));
        channel.start_recording();
        std::thread::sleep(Duration::from_millis(120));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recent.wav");
        channel
            .write_recent_wav(&path, Duration::from_secs(1))
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
    }
}
