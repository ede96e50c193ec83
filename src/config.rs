use std::env;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::errors::{AppError, AppResult};

/// Backends the pipeline can talk to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
    HfInference,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "ollama" => Some(ProviderKind::Ollama),
            "hf" | "huggingface" | "hf_inference" => Some(ProviderKind::HfInference),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::HfInference => "hf_inference",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_conn_string: String,
    pub mongo_db_name: String,
    pub chunks_collection: String,
    pub llm_provider: String,
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub hf_api_token: Option<SecretString>,
    pub hf_base_url: String,
    pub hf_model: String,
    pub provider_timeout_secs: u64,
    pub context_per_document_cap: usize,
    pub context_char_budget: usize,
    pub context_clip_chars: usize,
    pub default_language: String,
    pub language_min_sample_chars: usize,
    pub chars_per_question: usize,
    pub count_tolerance: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

impl Config {
    /// Loads `.env` (if present) and then reads the environment.
    pub fn load() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment overrides from {}", path.display());
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self {
            mongo_conn_string: env_or("MONGO_CONN_STRING", "mongodb://localhost:27017"),
            mongo_db_name: env_or("MONGO_DB_NAME", "quizgen-local"),
            chunks_collection: env_or("CHUNKS_COLLECTION", "document_chunks"),
            llm_provider: env_or("LLM_PROVIDER", "openai"),
            openai_api_key: env_secret("OPENAI_API_KEY"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            ollama_model: env_or("OLLAMA_MODEL", "llama3.1:8b"),
            hf_api_token: env_secret("HF_API_TOKEN"),
            hf_base_url: env_or("HF_BASE_URL", "https://router.huggingface.co/v1"),
            hf_model: env_or("HF_MODEL", "meta-llama/Llama-3.1-8B-Instruct"),
            provider_timeout_secs: env_parse_or("PROVIDER_TIMEOUT_SECS", 90),
            context_per_document_cap: env_parse_or("CONTEXT_PER_DOCUMENT_CAP", 6),
            context_char_budget: env_parse_or("CONTEXT_CHAR_BUDGET", 12_000),
            context_clip_chars: env_parse_or("CONTEXT_CLIP_CHARS", 700),
            default_language: env_or("DEFAULT_LANGUAGE", "en"),
            language_min_sample_chars: env_parse_or("LANGUAGE_MIN_SAMPLE_CHARS", 40),
            chars_per_question: env_parse_or("CHARS_PER_QUESTION", 250),
            count_tolerance: env_parse_or("COUNT_TOLERANCE", 1),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Resolves the selected backend and checks that its credentials and
    /// tunables are usable. Anything missing here is fatal.
    pub fn provider_kind(&self) -> AppResult<ProviderKind> {
        let kind = ProviderKind::parse(&self.llm_provider).ok_or_else(|| {
            AppError::Configuration(format!(
                "Unknown LLM_PROVIDER '{}'; expected openai, ollama or hf",
                self.llm_provider
            ))
        })?;

        match kind {
            ProviderKind::OpenAi => {
                require_secret(self.openai_api_key.as_ref(), "OPENAI_API_KEY")?;
                require_value(&self.openai_model, "OPENAI_MODEL")?;
            }
            ProviderKind::Ollama => {
                require_value(&self.ollama_base_url, "OLLAMA_BASE_URL")?;
                require_value(&self.ollama_model, "OLLAMA_MODEL")?;
            }
            ProviderKind::HfInference => {
                require_secret(self.hf_api_token.as_ref(), "HF_API_TOKEN")?;
                require_value(&self.hf_model, "HF_MODEL")?;
            }
        }

        if self.provider_timeout_secs == 0 {
            return Err(AppError::Configuration(
                "PROVIDER_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.chars_per_question == 0 {
            return Err(AppError::Configuration(
                "CHARS_PER_QUESTION must be greater than zero".to_string(),
            ));
        }

        Ok(kind)
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            mongo_conn_string: "mongodb://localhost:27017".to_string(),
            mongo_db_name: "quizgen-test".to_string(),
            chunks_collection: "document_chunks".to_string(),
            llm_provider: "openai".to_string(),
            openai_api_key: Some(SecretString::from("sk-test-key".to_string())),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            hf_api_token: None,
            hf_base_url: "https://router.huggingface.co/v1".to_string(),
            hf_model: "meta-llama/Llama-3.1-8B-Instruct".to_string(),
            provider_timeout_secs: 5,
            context_per_document_cap: 6,
            context_char_budget: 12_000,
            context_clip_chars: 700,
            default_language: "en".to_string(),
            language_min_sample_chars: 40,
            chars_per_question: 250,
            count_tolerance: 1,
        }
    }
}

fn require_secret(secret: Option<&SecretString>, key: &str) -> AppResult<()> {
    match secret {
        Some(value) if !value.expose_secret().trim().is_empty() => Ok(()),
        _ => Err(AppError::Configuration(format!("{} is not set", key))),
    }
}

fn require_value(value: &str, key: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Configuration(format!("{} is empty", key)));
    }
    Ok(())
}
