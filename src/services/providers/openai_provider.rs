use std::time::Duration;

use async_openai::{config::OpenAIConfig, error::OpenAIError, Client};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use super::{parse_model_output, ProviderError, ProviderResponse, QuizModelProvider};
use crate::{
    config::Config,
    errors::{AppError, AppResult},
};

/// Hosted OpenAI chat completions in JSON-object mode.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| AppError::Configuration("OPENAI_API_KEY is not set".to_string()))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(config.openai_base_url.trim_end_matches('/'));

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.openai_model.clone(),
            timeout: config.provider_timeout(),
        })
    }
}

#[async_trait]
impl QuizModelProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": super::GENERATION_TEMPERATURE,
            "response_format": { "type": "json_object" },
        });

        let response: Value = tokio::time::timeout(self.timeout, self.client.chat().create_byot(request))
            .await
            .map_err(|_| {
                ProviderError::transient(format!(
                    "OpenAI request timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(classify_openai_error)?;

        if let Some(usage) = response.get("usage") {
            log::debug!("OpenAI usage: {}", usage);
        }

        let content = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::malformed("completion had no message content", &response.to_string())
            })?;

        parse_model_output(content)
    }
}

fn classify_openai_error(err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::ApiError(api) => classify_api_message(&api.message),
        OpenAIError::InvalidArgument(message) => {
            ProviderError::Fatal(format!("invalid OpenAI request: {}", message))
        }
        other => ProviderError::transient(format!("OpenAI request failed: {}", other)),
    }
}

/// The client surfaces API errors by message only; sort them by wording.
fn classify_api_message(message: &str) -> ProviderError {
    let lowered = message.to_lowercase();
    let transient = ["rate limit", "overloaded", "timeout", "timed out", "server error", "try again"];
    if transient.iter().any(|hint| lowered.contains(hint)) {
        ProviderError::transient(format!("OpenAI: {}", message))
    } else {
        ProviderError::Fatal(format!("OpenAI: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_messages_are_classified_by_wording() {
        assert!(classify_api_message("Rate limit reached for gpt-4o-mini").is_transient());
        assert!(classify_api_message("The server is overloaded, please try again").is_transient());
        assert!(!classify_api_message("Incorrect API key provided: sk-***").is_transient());
        assert!(!classify_api_message("The model `gpt-9` does not exist").is_transient());
    }

    #[test]
    fn test_invalid_argument_is_fatal() {
        let err = classify_openai_error(OpenAIError::InvalidArgument("bad".to_string()));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_config_requires_api_key() {
        let mut config = Config::test_config();
        config.openai_api_key = None;
        assert!(matches!(
            OpenAiProvider::from_config(&config),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_config_uses_configured_model() {
        let provider = OpenAiProvider::from_config(&Config::test_config()).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }
}
