//! HTTP clients for the chat-completion services entities reason through.
//!
//! Two wire formats are supported: the `OpenAI` chat completions shape,
//! which `DeepSeek` and Ollama also speak, and the Anthropic Messages API.
//! [`LlmBackend`] is an enum rather than a trait object so the async
//! `complete` needs no boxing.
//!
//! Failures are classified for the round runner's retry policy: HTTP 429
//! is a rate limit, 5xx, 408, and connection failures mean the backend is
//! unavailable, client-side timeouts are timeouts, and everything else
//! (other 4xx, bodies without content) is invalid and never retried.

use std::time::Instant;

use cascade_core::BackendError;
use cascade_core::memory::truncate_chars;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::config::{BackendType, LlmBackendConfig};
use crate::prompt::RenderedPrompt;

/// Longest error body quoted in a backend error.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Version header value the Anthropic API requires.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A configured chat-completion service.
#[derive(Debug)]
pub enum LlmBackend {
    /// `/chat/completions` with bearer auth.
    OpenAi(OpenAiBackend),
    /// `/messages` with `x-api-key` auth.
    Anthropic(AnthropicBackend),
}

impl LlmBackend {
    /// Send one rendered prompt and return the model's text.
    pub async fn complete(&self, prompt: &RenderedPrompt) -> Result<String, BackendError> {
        match self {
            Self::OpenAi(backend) => backend.complete(prompt).await,
            Self::Anthropic(backend) => backend.complete(prompt).await,
        }
    }

    /// Label used in logs and error messages.
    pub const fn name(&self) -> &str {
        match self {
            Self::OpenAi(_) => "openai-compatible",
            Self::Anthropic(_) => "anthropic",
        }
    }
}

/// `OpenAI`-style chat completions. The system prompt travels as the first
/// message and JSON output is requested through `response_format`.
#[derive(Debug)]
pub struct OpenAiBackend {
    http: reqwest::Client,
    settings: LlmBackendConfig,
}

impl OpenAiBackend {
    /// Build a client for `settings.api_url`.
    pub fn new(settings: &LlmBackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings: settings.clone(),
        }
    }

    async fn complete(&self, prompt: &RenderedPrompt) -> Result<String, BackendError> {
        let payload = json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        let request = self
            .http
            .post(format!("{}/chat/completions", self.settings.api_url))
            .bearer_auth(&self.settings.api_key)
            .json(&payload);

        let body = send("OpenAI", request).await?;
        text_at(&body, "/choices/0/message/content", "OpenAI")
    }
}

/// Anthropic Messages API. The system prompt is a top-level field and the
/// answer comes back as a list of content blocks.
#[derive(Debug)]
pub struct AnthropicBackend {
    http: reqwest::Client,
    settings: LlmBackendConfig,
}

impl AnthropicBackend {
    /// Build a client for `settings.api_url`.
    pub fn new(settings: &LlmBackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings: settings.clone(),
        }
    }

    async fn complete(&self, prompt: &RenderedPrompt) -> Result<String, BackendError> {
        let payload = json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "system": prompt.system,
            "messages": [{ "role": "user", "content": prompt.user }],
        });

        let request = self
            .http
            .post(format!("{}/messages", self.settings.api_url))
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload);

        let body = send("Anthropic", request).await?;
        text_at(&body, "/content/0/text", "Anthropic")
    }
}

/// Pull the answer text out of a response body by JSON pointer.
fn text_at(body: &Value, pointer: &str, provider: &str) -> Result<String, BackendError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| BackendError::Invalid(format!("{provider} response has no text at {pointer}")))
}

/// Send a request and decode the JSON body of a successful response.
async fn send(provider: &str, request: reqwest::RequestBuilder) -> Result<Value, BackendError> {
    let started = Instant::now();
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(provider, &e, started))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| classify_transport(provider, &e, started));
    }

    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(provider, status, retry_after_ms, &body))
}

/// Map a non-success HTTP status to a backend error.
fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> BackendError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return BackendError::RateLimited { retry_after_ms };
    }
    let detail = format!(
        "{provider} returned {status}: {}",
        truncate_chars(body, MAX_ERROR_BODY_CHARS)
    );
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        BackendError::Unavailable(detail)
    } else {
        BackendError::Invalid(detail)
    }
}

/// Map a transport-level `reqwest` failure to a backend error.
fn classify_transport(provider: &str, err: &reqwest::Error, started: Instant) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout {
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    } else if err.is_decode() {
        BackendError::Invalid(format!("{provider} sent an undecodable body: {err}"))
    } else {
        BackendError::Unavailable(format!("{provider} request failed: {err}"))
    }
}

/// `Retry-After` in whole seconds, as milliseconds. HTTP-date values are
/// ignored and the retry policy's own backoff applies.
fn parse_retry_after(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

/// Build the HTTP client for a backend setting, or `None` for the offline
/// stub.
pub fn create_backend(settings: &LlmBackendConfig) -> Option<LlmBackend> {
    match settings.backend_type {
        BackendType::OpenAi => Some(LlmBackend::OpenAi(OpenAiBackend::new(settings))),
        BackendType::Anthropic => Some(LlmBackend::Anthropic(AnthropicBackend::new(settings))),
        BackendType::Stub => None,
    }
}
