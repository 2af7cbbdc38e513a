use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::llm::error::ProviderError;
use crate::llm::media::to_data_uri;
use crate::utils::http::{get_http_client, truncate_for_log};
use crate::utils::timing::log_llm_timing;

const PROVIDER: &str = "openai";

/// A vision-capable chat model that answers a prompt about one image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete_with_image(
        &self,
        operation: &str,
        prompt: &str,
        mime_type: &str,
        image: &[u8],
        max_tokens: u32,
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

fn extract_content(response: ChatCompletionResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default()
}

fn build_payload(model: &str, prompt: &str, data_uri: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_uri } }
                ]
            }
        ],
        "max_tokens": max_tokens
    })
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiVision {
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiVision {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    async fn call_chat_completions(&self, payload: &Value) -> Result<String, ProviderError> {
        let response = get_http_client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| ProviderError::transport(PROVIDER, &err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "OpenAI API error: status={}, body={}",
                status,
                truncate_for_log(&body, 2000)
            );
            return Err(ProviderError::from_response(PROVIDER, status, &body));
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| ProviderError::upstream(PROVIDER, format!("invalid response body: {err}")))?;
        let content = extract_content(parsed);
        if content.is_empty() {
            warn!("OpenAI response for model={} had empty content", self.model);
        }
        Ok(content)
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_image(
        &self,
        operation: &str,
        prompt: &str,
        mime_type: &str,
        image: &[u8],
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let payload = build_payload(&self.model, prompt, &to_data_uri(mime_type, image), max_tokens);
        debug!(
            "OpenAI request: model={}, operation={}, image_bytes={}, max_tokens={}",
            self.model,
            operation,
            image.len(),
            max_tokens
        );
        log_llm_timing(PROVIDER, &self.model, operation, || {
            self.call_chat_completions(&payload)
        })
        .await
    }
}
