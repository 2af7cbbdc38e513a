use async_trait::async_trait;

use crate::llm::error::ProviderError;
use crate::llm::media::ImageReference;

/// Input handed to every image-generation candidate.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image_data_uri: String,
}

/// An image-generation backend. Each adapter owns the extraction of image
/// references from its own response shape; an empty vector means the call
/// succeeded but produced nothing usable.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, request: &GenerationRequest)
        -> Result<Vec<ImageReference>, ProviderError>;
}
