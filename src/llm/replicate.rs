use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::ImageModelConfig;
use crate::llm::error::ProviderError;
use crate::llm::media::{essence, is_image_mime, ImageReference};
use crate::llm::provider::{GenerationRequest, ImageProvider};
use crate::utils::http::{get_http_client, truncate_for_log};
use crate::utils::timing::log_llm_timing;

/// Nesting allowed when walking prediction output. Real models answer with a
/// string, a list of strings, or one wrapper object; anything deeper is noise.
pub const MAX_OUTPUT_DEPTH: usize = 4;

/// Prediction output as the predictions API returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PredictionOutput {
    Text(String),
    List(Vec<PredictionOutput>),
    Object(OutputObject),
    Other(IgnoredAny),
}

/// Known wrapper fields, checked in this order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputObject {
    #[serde(default)]
    url: Option<Box<PredictionOutput>>,
    #[serde(default)]
    output: Option<Box<PredictionOutput>>,
    #[serde(default)]
    image: Option<Box<PredictionOutput>>,
    #[serde(default)]
    images: Option<Box<PredictionOutput>>,
    #[serde(default)]
    urls: Option<Box<PredictionOutput>>,
}

impl OutputObject {
    fn field_order(&self) -> [Option<&PredictionOutput>; 5] {
        [
            self.url.as_deref(),
            self.output.as_deref(),
            self.image.as_deref(),
            self.images.as_deref(),
            self.urls.as_deref(),
        ]
    }
}

pub fn extract_references(output: &PredictionOutput) -> Vec<ImageReference> {
    collect_references(output, 0)
}

fn collect_references(output: &PredictionOutput, depth: usize) -> Vec<ImageReference> {
    if depth > MAX_OUTPUT_DEPTH {
        return Vec::new();
    }
    match output {
        PredictionOutput::Text(value) => ImageReference::parse(value).into_iter().collect(),
        PredictionOutput::List(items) => items
            .iter()
            .flat_map(|item| collect_references(item, depth + 1))
            .collect(),
        PredictionOutput::Object(object) => object
            .field_order()
            .into_iter()
            .flatten()
            .map(|field| collect_references(field, depth + 1))
            .find(|found| !found.is_empty())
            .unwrap_or_default(),
        PredictionOutput::Other(_) => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

impl Prediction {
    fn is_pending(&self) -> bool {
        matches!(self.status.as_deref(), Some("starting") | Some("processing"))
    }

    fn failure(&self) -> Option<String> {
        match self.status.as_deref() {
            Some("failed") | Some("canceled") | Some("aborted") => {
                let detail = match &self.error {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Null) | None => "no error detail".to_string(),
                    Some(other) => other.to_string(),
                };
                Some(format!(
                    "prediction {} {}: {}",
                    self.id.as_deref().unwrap_or("unknown"),
                    self.status.as_deref().unwrap_or("failed"),
                    detail
                ))
            }
            _ => None,
        }
    }
}

enum PredictionReply {
    Prediction(Prediction),
    Binary(ImageReference),
}

/// One Replicate-hosted model.
#[derive(Debug, Clone)]
pub struct ReplicateProvider {
    model: ImageModelConfig,
    base_url: String,
    api_token: String,
    openai_api_key: String,
    poll_attempts: usize,
    poll_interval: Duration,
}

impl ReplicateProvider {
    pub fn new(
        model: ImageModelConfig,
        base_url: &str,
        api_token: &str,
        openai_api_key: &str,
        poll_attempts: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            openai_api_key: openai_api_key.to_string(),
            poll_attempts,
            poll_interval,
        }
    }

    fn build_input(&self, request: &GenerationRequest) -> Map<String, Value> {
        let mut input = self.model.params.clone();
        input.insert("prompt".to_string(), json!(request.prompt));
        input.insert("image".to_string(), json!(request.image_data_uri));
        if self.model.supports_byo_openai_key {
            input.insert("openai_api_key".to_string(), json!(self.openai_api_key));
        }
        input
    }

    /// `owner/name` runs the latest deployment; `owner/name:version` pins one.
    fn build_request(&self, input: Map<String, Value>) -> Result<(String, Value), ProviderError> {
        let name = self.model.name.as_str();
        match name.split_once(':') {
            Some((_, version)) if !version.is_empty() => Ok((
                format!("{}/predictions", self.base_url),
                json!({ "version": version, "input": input }),
            )),
            _ => {
                let (owner, model) = name.split_once('/').ok_or_else(|| {
                    ProviderError::upstream(name, "model identifier must look like owner/name")
                })?;
                Ok((
                    format!("{}/models/{}/{}/predictions", self.base_url, owner, model),
                    json!({ "input": input }),
                ))
            }
        }
    }

    async fn read_reply(&self, response: reqwest::Response) -> Result<PredictionReply, ProviderError> {
        let name = self.model.name.as_str();
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Replicate API error for model={}: status={}, body={}",
                name,
                status,
                truncate_for_log(&body, 2000)
            );
            return Err(ProviderError::from_response(name, status, &body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(essence)
            .unwrap_or_default();

        if is_image_mime(&content_type) {
            let bytes = response
                .bytes()
                .await
                .map_err(|err| ProviderError::transport(name, &err))?;
            if bytes.is_empty() {
                return Err(ProviderError::empty_output(name));
            }
            return Ok(PredictionReply::Binary(ImageReference::Inline {
                mime_type: content_type,
                bytes: bytes.to_vec(),
            }));
        }

        let prediction = response
            .json::<Prediction>()
            .await
            .map_err(|err| ProviderError::upstream(name, format!("invalid prediction body: {err}")))?;
        Ok(PredictionReply::Prediction(prediction))
    }

    async fn wait_for_prediction(&self, mut prediction: Prediction) -> Result<Prediction, ProviderError> {
        let name = self.model.name.as_str();
        let mut polls = 0;
        while prediction.is_pending() {
            if polls >= self.poll_attempts {
                return Err(ProviderError::upstream(
                    name,
                    format!(
                        "prediction {} still {} after {} polls",
                        prediction.id.as_deref().unwrap_or("unknown"),
                        prediction.status.as_deref().unwrap_or("pending"),
                        polls
                    ),
                ));
            }
            let Some(get_url) = prediction.urls.as_ref().and_then(|urls| urls.get.clone()) else {
                return Err(ProviderError::upstream(
                    name,
                    "pending prediction did not include a polling URL",
                ));
            };
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
            debug!("Polling Replicate prediction for model={} ({polls})", name);

            let response = get_http_client()
                .get(&get_url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|err| ProviderError::transport(name, &err))?;
            prediction = match self.read_reply(response).await? {
                PredictionReply::Prediction(next) => next,
                PredictionReply::Binary(_) => {
                    return Err(ProviderError::upstream(
                        name,
                        "polling URL returned binary content",
                    ))
                }
            };
        }
        Ok(prediction)
    }

    async fn run_prediction(&self, request: &GenerationRequest) -> Result<Vec<ImageReference>, ProviderError> {
        let name = self.model.name.as_str();
        let (url, body) = self.build_request(self.build_input(request))?;

        let response = get_http_client()
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::transport(name, &err))?;

        let prediction = match self.read_reply(response).await? {
            PredictionReply::Binary(reference) => return Ok(vec![reference]),
            PredictionReply::Prediction(prediction) => prediction,
        };
        let prediction = self.wait_for_prediction(prediction).await?;
        if let Some(failure) = prediction.failure() {
            return Err(ProviderError::upstream(name, failure));
        }

        let references = prediction
            .output
            .as_ref()
            .map(extract_references)
            .unwrap_or_default();
        info!(
            "Replicate model={} finished with status={} references={}",
            name,
            prediction.status.as_deref().unwrap_or("unknown"),
            references.len()
        );
        Ok(references)
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        &self.model.name
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<ImageReference>, ProviderError> {
        log_llm_timing("replicate", &self.model.name, "transform_image", || {
            self.run_prediction(request)
        })
        .await
    }
}
