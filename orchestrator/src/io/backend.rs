//! Generation backends: `(model, prompt) -> text` over HTTP.
//!
//! The [`Backend`] trait is the seam the pipeline depends on. Tests use
//! scripted backends; production uses the blocking HTTP clients below.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::backoff::RetryPolicy;
use crate::io::config::Provider;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2000;

/// A backend call that produced no text (network, HTTP status, or response
/// shape).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{backend} call failed: {message}")]
pub struct TransportFailure {
    pub backend: String,
    pub message: String,
}

impl TransportFailure {
    pub fn new(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

pub trait Backend {
    /// Short label used in logs and errors.
    fn name(&self) -> &str;

    fn complete(&self, model: &str, prompt: &str) -> Result<String, TransportFailure>;
}

/// Call `backend`, retrying transport failures with exponential backoff.
///
/// The last failure is returned once `policy.max_retries` retries are spent.
#[instrument(skip_all, fields(backend = backend.name(), model))]
pub fn call_with_retry(
    backend: &dyn Backend,
    model: &str,
    prompt: &str,
    policy: &RetryPolicy,
) -> Result<String, TransportFailure> {
    let mut attempt = 0;
    loop {
        match backend.complete(model, prompt) {
            Ok(text) => return Ok(text),
            Err(err) if attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    err = %err,
                    retry = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "backend call failed, retrying"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Build the HTTP backend for `provider`, reading its key from the environment.
pub fn http_backend(provider: Provider, timeout: Duration) -> Result<Box<dyn Backend>> {
    let api_key = api_key(provider)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("build http client")?;
    Ok(match provider {
        Provider::OpenAi => Box::new(OpenAiBackend { client, api_key }),
        Provider::Anthropic => Box::new(AnthropicBackend { client, api_key }),
    })
}

/// Non-empty API key for `provider`.
pub fn api_key(provider: Provider) -> Result<String> {
    let var = provider.api_key_env();
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(anyhow!("{var} is not set (required by the {provider} backend)")),
    }
}

pub struct OpenAiBackend {
    client: reqwest::blocking::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, model: &str, prompt: &str) -> Result<String, TransportFailure> {
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.7,
            "max_tokens": MAX_TOKENS,
        });
        let request = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&body);
        let response: ChatCompletion = send(self.name(), request)?;
        openai_text(response).ok_or_else(|| {
            TransportFailure::new(self.name(), "response has no message content")
        })
    }
}

fn openai_text(response: ChatCompletion) -> Option<String> {
    response.choices.into_iter().next()?.message.content
}

pub struct AnthropicBackend {
    client: reqwest::blocking::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn complete(&self, model: &str, prompt: &str) -> Result<String, TransportFailure> {
        let body = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });
        let request = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response: MessagesResponse = send(self.name(), request)?;
        anthropic_text(response)
            .ok_or_else(|| TransportFailure::new(self.name(), "response has no text block"))
    }
}

fn anthropic_text(response: MessagesResponse) -> Option<String> {
    response
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
}

fn send<T: serde::de::DeserializeOwned>(
    backend: &str,
    request: reqwest::blocking::RequestBuilder,
) -> Result<T, TransportFailure> {
    let response = request
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|err| TransportFailure::new(backend, err.to_string()))?;
    debug!(backend, status = %response.status(), "backend responded");
    response
        .json()
        .map_err(|err| TransportFailure::new(backend, format!("decode response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedBackend;

    #[test]
    fn retries_transport_failures_until_success() {
        let backend = ScriptedBackend::new(vec![
            Err(TransportFailure::new("scripted", "connection reset")),
            Err(TransportFailure::new("scripted", "503")),
            Ok("hello".to_string()),
        ]);
        let text = call_with_retry(&backend, "m", "p", &RetryPolicy::immediate(2)).expect("text");
        assert_eq!(text, "hello");
        assert_eq!(backend.prompts().len(), 3);
    }

    #[test]
    fn exhaustion_returns_last_failure() {
        let backend = ScriptedBackend::new(vec![
            Err(TransportFailure::new("scripted", "first")),
            Err(TransportFailure::new("scripted", "second")),
            Ok("never reached".to_string()),
        ]);
        let err = call_with_retry(&backend, "m", "p", &RetryPolicy::immediate(1)).unwrap_err();
        assert_eq!(err.message, "second");
        assert_eq!(backend.prompts().len(), 2);
    }

    #[test]
    fn extracts_openai_message_content() {
        let response: ChatCompletion = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}}]
        }))
        .expect("decode");
        assert_eq!(openai_text(response).as_deref(), Some("hi"));

        let empty: ChatCompletion = serde_json::from_value(json!({"choices": []})).expect("decode");
        assert_eq!(openai_text(empty), None);
    }

    #[test]
    fn extracts_first_anthropic_text_block() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "answer"}
            ]
        }))
        .expect("decode");
        assert_eq!(anthropic_text(response).as_deref(), Some("answer"));
    }
}
