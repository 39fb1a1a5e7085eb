//! Inference capability.
//!
//! The supervisor consumes AI inference through `InferenceService`; the
//! concrete backend is selected once at construction. Calls are blocking and
//! network-dependent, so the worker only issues them under the analysis
//! throttle and treats failure as "skip this cycle's analysis".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Sampling parameters for one chat call.
#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 500,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatReply {
    pub text: String,
}

pub trait InferenceService: Send + Sync {
    fn name(&self) -> &'static str;

    fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<ChatReply>;
}

// ----------------------------------------------------------------------------
// Ollama backend
// ----------------------------------------------------------------------------

/// Local Ollama server client (`POST /api/generate`).
pub struct OllamaClient {
    base_url: String,
    model: String,
    agent: ureq::Agent,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl InferenceService for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<ChatReply> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .agent
            .post(&url)
            .send_json(serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": options.temperature,
                    "num_predict": options.max_tokens,
                },
            }))
            .map_err(|err| anyhow!("inference service unavailable: {}", err))?;

        let body: serde_json::Value = response.into_json()?;
        let text = body
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow!("inference response missing 'response' field"))?
            .trim()
            .to_string();
        Ok(ChatReply { text })
    }
}

// ----------------------------------------------------------------------------
// Stub backend (tests, demo)
// ----------------------------------------------------------------------------

/// Fixed-reply backend that counts invocations, for tests and the demo.
pub struct StubInference {
    reply: String,
    calls: AtomicU64,
}

impl StubInference {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceService for StubInference {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn chat(&self, _prompt: &str, _options: &ChatOptions) -> Result<ChatReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatReply {
            text: self.reply.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_counts_calls() {
        let stub = StubInference::new("routine activity");
        let options = ChatOptions::default();
        stub.chat("prompt", &options).unwrap();
        stub.chat("prompt", &options).unwrap();
        assert_eq!(stub.calls(), 2);
        assert_eq!(stub.chat("x", &options).unwrap().text, "routine activity");
    }
}
