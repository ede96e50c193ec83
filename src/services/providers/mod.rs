//! Uniform generation contract over the supported LLM backends.
//!
//! Every adapter takes the same prompt pair and hands back plain JSON. How a
//! backend is reached, authenticated and unwrapped stays inside its adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::{Config, ProviderKind},
    errors::{AppError, AppResult},
};

pub mod hf_inference_provider;
pub mod ollama_provider;
pub mod openai_provider;

pub use hf_inference_provider::HfInferenceProvider;
pub use ollama_provider::OllamaProvider;
pub use openai_provider::OpenAiProvider;

pub(crate) const GENERATION_TEMPERATURE: f32 = 0.2;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[a-zA-Z]*\s*\n?(.*?)```").expect("FENCED_BLOCK is a valid regex pattern")
});

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ProviderError {
    /// Worth one more try: timeouts, dropped connections, throttling and
    /// bodies that did not parse.
    #[error("{reason}")]
    Transient { reason: String, raw: Option<String> },

    /// Retrying cannot help: credentials, unknown model, bad request shape.
    #[error("{0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn transient(reason: impl Into<String>) -> Self {
        ProviderError::Transient {
            reason: reason.into(),
            raw: None,
        }
    }

    pub fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        ProviderError::Transient {
            reason: reason.into(),
            raw: Some(raw.to_string()),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            ProviderError::Transient { raw, .. } => raw.as_deref(),
            ProviderError::Fatal(_) => None,
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient { reason, .. } => AppError::ProviderTransient(reason),
            ProviderError::Fatal(reason) => AppError::ProviderFatal(reason),
        }
    }
}

/// Parsed model output plus the text it was parsed from, kept for the audit
/// trace and for repair prompts.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderResponse {
    pub content: Value,
    pub raw: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuizModelProvider: Send + Sync {
    /// Backend identifier recorded in the audit trace.
    fn name(&self) -> &'static str;

    fn model(&self) -> String;

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ProviderResponse, ProviderError>;
}

pub fn build_provider(config: &Config) -> AppResult<Arc<dyn QuizModelProvider>> {
    let provider: Arc<dyn QuizModelProvider> = match config.provider_kind()? {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_config(config)?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_config(config)?),
        ProviderKind::HfInference => Arc::new(HfInferenceProvider::from_config(config)?),
    };

    log::info!(
        "Using LLM provider '{}' with model '{}'",
        provider.name(),
        provider.model()
    );
    Ok(provider)
}

pub(crate) fn http_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Maps an HTTP failure status onto the transient/fatal split.
pub fn classify_status(status: u16, message: &str) -> ProviderError {
    let reason = format!("HTTP {}: {}", status, message);
    match status {
        408 | 429 => ProviderError::transient(reason),
        500..=599 => ProviderError::transient(reason),
        _ => ProviderError::Fatal(reason),
    }
}

pub(crate) fn classify_reqwest_error(err: &reqwest::Error) -> ProviderError {
    if err.is_builder() {
        return ProviderError::Fatal(format!("invalid request: {}", err));
    }
    if let Some(status) = err.status() {
        return classify_status(status.as_u16(), &err.to_string());
    }
    if err.is_timeout() {
        return ProviderError::transient(format!("request timed out: {}", err));
    }
    ProviderError::transient(format!("request failed: {}", err))
}

/// Pulls `error.message` (or a bare `error` string) out of an error body.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ErrorBody {
        Nested { error: ErrorObject },
        Flat { error: String },
    }
    #[derive(Deserialize)]
    struct ErrorObject {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body).ok()? {
        ErrorBody::Nested { error } => Some(error.message),
        ErrorBody::Flat { error } => Some(error),
    }
}

pub(crate) async fn read_error_body(res: reqwest::Response) -> ProviderError {
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or(body);
    classify_status(status, message.trim())
}

/// Parses model text into JSON, tolerating markdown fences and prose around
/// the payload. Unparseable text is a transient failure carrying the raw text.
pub fn parse_model_output(raw: &str) -> Result<ProviderResponse, ProviderError> {
    let candidate = extract_json(raw)
        .ok_or_else(|| ProviderError::malformed("response contained no JSON value", raw))?;

    let content: Value = serde_json::from_str(candidate)
        .map_err(|e| ProviderError::malformed(format!("response is not valid JSON: {}", e), raw))?;

    Ok(ProviderResponse {
        content,
        raw: raw.to_string(),
    })
}

/// Locates the JSON payload in free text: the whole text if it parses, else
/// the first fenced block, else the first balanced object or array.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_ok() {
        return Some(trimmed);
    }

    if let Some(inner) = FENCED_BLOCK
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
    {
        if !inner.is_empty() {
            return Some(inner);
        }
    }

    balanced_json(trimmed)
}

fn balanced_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
