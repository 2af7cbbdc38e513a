use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::llm::{HttpImageFetcher, ImageFetcher, ImageProvider, OpenAiVision, ReplicateProvider, VisionModel};
use crate::refinish::chain::ProviderChain;
use crate::refinish::pipeline::TransformationPipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub vision: Arc<dyn VisionModel>,
    pub pipeline: Arc<TransformationPipeline>,
}

impl AppState {
    pub fn new(
        config: Config,
        vision: Arc<dyn VisionModel>,
        providers: Vec<Arc<dyn ImageProvider>>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        let chain = ProviderChain::new(
            providers,
            Duration::from_millis(config.provider_attempt_delay_ms),
        );
        let pipeline = TransformationPipeline::new(
            vision.clone(),
            chain,
            fetcher,
            config.analysis_max_tokens,
        );
        AppState {
            config: Arc::new(config),
            vision,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Wires the OpenAI vision model and one Replicate provider per configured model.
    pub fn from_config(config: Config) -> Self {
        let vision = Arc::new(OpenAiVision::new(
            &config.openai_base_url,
            &config.openai_api_key,
            &config.openai_vision_model,
        ));
        let poll_interval = Duration::from_millis(config.replicate_poll_interval_ms);
        let providers = config
            .image_models
            .iter()
            .map(|model| {
                Arc::new(ReplicateProvider::new(
                    model.clone(),
                    &config.replicate_base_url,
                    &config.replicate_api_token,
                    &config.openai_api_key,
                    config.replicate_poll_attempts,
                    poll_interval,
                )) as Arc<dyn ImageProvider>
            })
            .collect();
        AppState::new(config, vision, providers, Arc::new(HttpImageFetcher))
    }
}
