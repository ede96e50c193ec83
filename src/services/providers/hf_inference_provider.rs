use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{
    classify_reqwest_error, http_client, parse_model_output, read_error_body, ProviderError,
    ProviderResponse, QuizModelProvider, GENERATION_TEMPERATURE,
};
use crate::{
    config::Config,
    errors::{AppError, AppResult},
};

const MAX_NEW_TOKENS: u32 = 4_096;

/// Hugging Face inference router through its OpenAI-compatible chat route.
/// Open models answer in free text, so the JSON payload is dug out of it.
pub struct HfInferenceProvider {
    client: reqwest::Client,
    base_url: String,
    api_token: SecretString,
    model: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HfInferenceProvider {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let api_token = config
            .hf_api_token
            .clone()
            .ok_or_else(|| AppError::Configuration("HF_API_TOKEN is not set".to_string()))?;

        Ok(Self {
            client: http_client(config.provider_timeout())?,
            base_url: config.hf_base_url.trim_end_matches('/').to_string(),
            api_token,
            model: config.hf_model.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl QuizModelProvider for HfInferenceProvider {
    fn name(&self) -> &'static str {
        "hf_inference"
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = ChatCompletionRequest {
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
            temperature: GENERATION_TEMPERATURE,
            max_tokens: MAX_NEW_TOKENS,
            stream: false,
        };

        let res = self
            .client
            .post(self.completions_url())
            .header(CONTENT_TYPE, "application/json")
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.api_token.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !res.status().is_success() {
            return Err(read_error_body(res).await);
        }

        let body = res.text().await.map_err(|e| classify_reqwest_error(&e))?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::malformed(format!("unexpected inference response: {}", e), &body)
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::malformed("inference returned no message content", &body))?;

        parse_model_output(&content)
    }
}
