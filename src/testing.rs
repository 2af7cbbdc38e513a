//! Scripted collaborators for unit tests. Nothing here touches the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Config;
use crate::llm::media::FetchedImage;
use crate::llm::{
    GenerationRequest, ImageFetcher, ImageProvider, ImageReference, ProviderError,
    ProviderErrorKind, VisionModel,
};
use crate::state::AppState;

#[derive(Debug, Clone)]
enum VisionScript {
    Reply(String),
    Fail(ProviderErrorKind),
    Stall,
}

/// Long enough to outlast any request limit.
const STALL: Duration = Duration::from_secs(3600);

#[derive(Debug)]
pub struct FakeVision {
    script: VisionScript,
    prompts: Mutex<Vec<String>>,
}

impl FakeVision {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            script: VisionScript::Reply(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(kind: ProviderErrorKind) -> Arc<Self> {
        Arc::new(Self {
            script: VisionScript::Fail(kind),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn stalling() -> Arc<Self> {
        Arc::new(Self {
            script: VisionScript::Stall,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl VisionModel for FakeVision {
    fn model_name(&self) -> &str {
        "fake-vision"
    }

    async fn complete_with_image(
        &self,
        _operation: &str,
        prompt: &str,
        _mime_type: &str,
        _image: &[u8],
        _max_tokens: u32,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        match &self.script {
            VisionScript::Reply(text) => Ok(text.clone()),
            VisionScript::Fail(kind) => Err(ProviderError::new(*kind, "fake-vision", "scripted failure")),
            VisionScript::Stall => {
                tokio::time::sleep(STALL).await;
                Ok(String::new())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProviderScript {
    Empty,
    Output(&'static str),
    Fail(ProviderErrorKind),
    Stall,
}

#[derive(Debug)]
pub struct FakeProvider {
    name: String,
    script: ProviderScript,
    prompts: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(name: &str, script: ProviderScript) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ImageProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<ImageReference>, ProviderError> {
        self.prompts.lock().push(request.prompt.clone());
        match self.script {
            ProviderScript::Empty => Ok(Vec::new()),
            ProviderScript::Output(value) => Ok(ImageReference::parse(value).into_iter().collect()),
            ProviderScript::Fail(kind) => Err(ProviderError::new(kind, &self.name, "scripted failure")),
            ProviderScript::Stall => {
                tokio::time::sleep(STALL).await;
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Debug)]
pub struct FakeFetcher {
    reply: Option<FetchedImage>,
    urls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(FetchedImage {
                bytes,
                content_type,
            }),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, ProviderError> {
        self.urls.lock().push(url.to_string());
        self.reply.clone().ok_or_else(|| {
            ProviderError::new(ProviderErrorKind::Upstream, "image-download", "status 404 Not Found")
        })
    }
}

/// Application state wired to fakes.
pub fn fake_state(
    config: Config,
    vision: Arc<FakeVision>,
    providers: &[Arc<FakeProvider>],
    fetcher: Arc<FakeFetcher>,
) -> AppState {
    AppState::new(
        config,
        vision,
        providers
            .iter()
            .map(|provider| provider.clone() as Arc<dyn ImageProvider>)
            .collect(),
        fetcher,
    )
}

pub const BOUNDARY: &str = "studio-test-boundary";

/// Hand-built `multipart/form-data` body.
#[derive(Debug, Default)]
pub struct MultipartBody {
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }
}
