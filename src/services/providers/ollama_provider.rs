use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    classify_reqwest_error, http_client, parse_model_output, read_error_body, ProviderError,
    ProviderResponse, QuizModelProvider, GENERATION_TEMPERATURE,
};
use crate::{config::Config, errors::AppResult};

/// Self-hosted Ollama server, non-streaming `/api/chat` with JSON output.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    format: &'static str,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self {
            client: http_client(config.provider_timeout())?,
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl QuizModelProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            format: "json",
            stream: false,
            options: ChatOptions {
                temperature: GENERATION_TEMPERATURE,
            },
        };

        let res = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !res.status().is_success() {
            return Err(read_error_body(res).await);
        }

        let body = res.text().await.map_err(|e| classify_reqwest_error(&e))?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::malformed(format!("unexpected Ollama response: {}", e), &body)
        })?;
        if let Some(tokens) = parsed.eval_count {
            log::debug!("Ollama generated {} tokens", tokens);
        }

        let content = parsed
            .message
            .map(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::malformed("Ollama returned an empty message", &body))?;

        parse_model_output(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_url_ignores_trailing_slash() {
        let mut config = Config::test_config();
        config.ollama_base_url = "http://gpu-box:11434/".to_string();

        let provider = OllamaProvider::from_config(&config).unwrap();
        assert_eq!(provider.chat_url(), "http://gpu-box:11434/api/chat");
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn test_request_asks_for_non_streaming_json() {
        let request = ChatRequest {
            model: "llama3.1:8b",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            format: "json",
            stream: false,
            options: ChatOptions { temperature: 0.2 },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let mut config = Config::test_config();
        config.ollama_base_url = "http://127.0.0.1:9".to_string();
        config.provider_timeout_secs = 2;

        let provider = OllamaProvider::from_config(&config).unwrap();
        let err = provider.generate("system", "user").await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }
}
