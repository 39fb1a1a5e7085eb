//! Speech transcription capability.
//!
//! Transcription is the one blocking, network-dependent audio operation.
//! The supervisor invokes it only under the analysis throttle, never on
//! every cycle. Backends implement `TranscriptionBackend`; the concrete
//! backend is selected once at construction.

use std::time::Duration;

/// Outcome of one transcription attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptionResult {
    Ok {
        text: String,
        confidence: Option<f32>,
    },
    /// No usable audio, or the service could not be reached. Transient.
    Unavailable,
    Error(String),
}

impl TranscriptionResult {
    pub fn text(&self) -> Option<&str> {
        match self {
            TranscriptionResult::Ok { text, .. } => Some(text),
            _ => None,
        }
    }
}

pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transcribe mono PCM16 samples. Implementations must map transport
    /// failures to `Unavailable` rather than erroring: an unreachable
    /// service skips this cycle's transcription, nothing more.
    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> TranscriptionResult;
}

// ----------------------------------------------------------------------------
// HTTP backend (whisper-server style: POST WAV, JSON {"text": ...} back)
// ----------------------------------------------------------------------------

pub struct HttpTranscriber {
    url: String,
    agent: ureq::Agent,
}

impl HttpTranscriber {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl TranscriptionBackend for HttpTranscriber {
    fn name(&self) -> &'static str {
        "http"
    }

    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> TranscriptionResult {
        if samples.is_empty() {
            return TranscriptionResult::Unavailable;
        }
        let wav = encode_wav_pcm16(samples, sample_rate);

        let response = match self
            .agent
            .post(&self.url)
            .set("Content-Type", "audio/wav")
            .send_bytes(&wav)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return TranscriptionResult::Error(format!(
                    "transcription service returned status {}",
                    code
                ))
            }
            Err(err) => {
                log::debug!("transcription service unreachable: {}", err);
                return TranscriptionResult::Unavailable;
            }
        };

        let body: serde_json::Value = match response.into_json() {
            Ok(body) => body,
            Err(err) => {
                return TranscriptionResult::Error(format!(
                    "transcription response was not JSON: {}",
                    err
                ))
            }
        };

        let text = body
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            // Speech not understood; treat like silence.
            return TranscriptionResult::Unavailable;
        }
        let confidence = body
            .get("confidence")
            .and_then(|c| c.as_f64())
            .map(|c| c as f32);
        TranscriptionResult::Ok { text, confidence }
    }
}

// ----------------------------------------------------------------------------
// Stub backend (tests, demo, transcription disabled)
// ----------------------------------------------------------------------------

/// Fixed-response backend. `silent()` models a deployment with no
/// transcription service configured.
pub struct StubTranscriber {
    text: Option<String>,
}

impl StubTranscriber {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn silent() -> Self {
        Self { text: None }
    }
}

impl TranscriptionBackend for StubTranscriber {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn transcribe(&self, samples: &[i16], _sample_rate: u32) -> TranscriptionResult {
        if samples.is_empty() {
            return TranscriptionResult::Unavailable;
        }
        match &self.text {
            Some(text) => TranscriptionResult::Ok {
                text: text.clone(),
                confidence: Some(1.0),
            },
            None => TranscriptionResult::Unavailable,
        }
    }
}

// ----------------------------------------------------------------------------
// WAV encoding (PCM16 mono)
// ----------------------------------------------------------------------------

/// Minimal RIFF/WAVE container around mono PCM16 samples.
pub fn encode_wav_pcm16(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * 2;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_well_formed() {
        let samples = vec![0i16, 1000, -1000, 32767];
        let wav = encode_wav_pcm16(&samples, 16_000);

        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(wav.len(), 44 + samples.len() * 2);
        // Sample rate field.
        assert_eq!(&wav[24..28], &16_000u32.to_le_bytes());
    }

    #[test]
    fn stub_transcriber_reports_unavailable_for_silence() {
        let backend = StubTranscriber::with_text("hello");
        assert_eq!(backend.transcribe(&[], 16_000), TranscriptionResult::Unavailable);
        assert_eq!(
            backend.transcribe(&[1, 2, 3], 16_000).text(),
            Some("hello")
        );
    }
}
