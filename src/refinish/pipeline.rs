use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{AppError, Operation};
use crate::llm::media::{resolve_reference, to_data_uri};
use crate::llm::{
    GenerationRequest, ImageFetcher, NormalizedImage, ProviderError, VisionModel,
};
use crate::refinish::chain::{ChainError, ProviderChain};
use crate::refinish::surface::{
    analysis_prompt, build_instruction, generation_prompt, SurfaceType,
};

/// A validated transformation job.
#[derive(Debug, Clone)]
pub struct TransformationRequest {
    pub surface: SurfaceType,
    pub image: Vec<u8>,
    pub mime_type: String,
    pub custom_directions: Option<String>,
}

impl TransformationRequest {
    pub fn has_custom_directions(&self) -> bool {
        self.custom_directions.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct TransformationOutcome {
    pub image: NormalizedImage,
    pub provider: String,
    pub transformation_description: String,
}

pub struct TransformationPipeline {
    vision: Arc<dyn VisionModel>,
    chain: ProviderChain,
    fetcher: Arc<dyn ImageFetcher>,
    analysis_max_tokens: u32,
}

fn exhausted_details(attempted: &[String], last_error: Option<&ProviderError>) -> String {
    let attempted = if attempted.is_empty() {
        "none".to_string()
    } else {
        attempted.join(", ")
    };
    match last_error {
        Some(err) => format!(
            "All attempted models failed. Last error: {}. Models attempted: {}.\n\n\
             Troubleshooting steps:\n\
             1. Check that REPLICATE_API_TOKEN is set correctly\n\
             2. Verify your Replicate account has credits and access to the models\n\
             3. Add or reorder image-to-image models in the file named by IMAGE_MODELS_CONFIG_PATH",
            err.message, attempted
        ),
        None => format!(
            "No model was successfully executed. Models attempted: {attempted}. \
             Check that your API keys and image model configuration are set correctly."
        ),
    }
}

impl TransformationPipeline {
    pub fn new(
        vision: Arc<dyn VisionModel>,
        chain: ProviderChain,
        fetcher: Arc<dyn ImageFetcher>,
        analysis_max_tokens: u32,
    ) -> Self {
        Self {
            vision,
            chain,
            fetcher,
            analysis_max_tokens,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.chain.len()
    }

    async fn analyze(&self, request: &TransformationRequest, instruction: &str) -> Result<String, AppError> {
        info!(
            "Analyzing image with {} for surface type: {}",
            self.vision.model_name(),
            request.surface
        );
        let prompt = analysis_prompt(instruction, request.has_custom_directions());
        let analysis = self
            .vision
            .complete_with_image(
                "analyze_surface",
                &prompt,
                &request.mime_type,
                &request.image,
                self.analysis_max_tokens,
            )
            .await
            .map_err(|err| AppError::provider(Operation::Transform, err))?;

        if analysis.trim().is_empty() {
            warn!("Vision analysis was empty; using the surface instruction instead");
            return Ok(instruction.to_string());
        }
        Ok(analysis.trim().to_string())
    }

    pub async fn run(&self, request: &TransformationRequest) -> Result<TransformationOutcome, AppError> {
        let instruction = build_instruction(request.surface, request.custom_directions.as_deref());
        let transformation_description = self.analyze(request, &instruction).await?;
        debug!("Transformation description: {}", transformation_description);

        let generation = GenerationRequest {
            prompt: generation_prompt(&transformation_description, request.has_custom_directions()),
            image_data_uri: to_data_uri(&request.mime_type, &request.image),
        };
        if self.chain.is_empty() {
            warn!("No image models are configured");
        }
        info!("Generating transformed image with {} candidate model(s)", self.chain.len());

        let success = match self.chain.run(&generation).await {
            Ok(success) => success,
            Err(ChainError::RateLimited(err)) => {
                return Err(AppError::provider(Operation::Transform, err))
            }
            Err(ChainError::Exhausted {
                attempted,
                last_error,
            }) => {
                return Err(AppError::ProvidersExhausted(exhausted_details(
                    &attempted,
                    last_error.as_ref(),
                )))
            }
        };

        let Some(reference) = success.references.first() else {
            return Err(AppError::ProvidersExhausted(exhausted_details(
                &[success.provider],
                None,
            )));
        };
        info!(
            "Using {} output from {} ({} reference(s))",
            reference.kind_label(),
            success.provider,
            success.references.len()
        );

        let image = resolve_reference(reference, self.fetcher.as_ref())
            .await
            .map_err(|err| AppError::provider(Operation::Transform, err))?;

        Ok(TransformationOutcome {
            image,
            provider: success.provider,
            transformation_description,
        })
    }
}
