use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::llm::{GenerationRequest, ImageProvider, ImageReference, ProviderError};

/// The candidate that produced output.
#[derive(Debug, Clone)]
pub struct ChainSuccess {
    pub provider: String,
    pub references: Vec<ImageReference>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A provider was rate limited; no further candidates were tried.
    #[error("rate limited by {}", .0.provider)]
    RateLimited(ProviderError),
    #[error("all {} image model(s) failed", .attempted.len())]
    Exhausted {
        attempted: Vec<String>,
        last_error: Option<ProviderError>,
    },
}

/// Tries image providers strictly in order until one yields a reference.
pub struct ProviderChain {
    providers: Vec<Arc<dyn ImageProvider>>,
    attempt_delay: Duration,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn ImageProvider>>, attempt_delay: Duration) -> Self {
        Self {
            providers,
            attempt_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn run(&self, request: &GenerationRequest) -> Result<ChainSuccess, ChainError> {
        let total = self.providers.len();
        let mut attempted = Vec::with_capacity(total);
        let mut last_error: Option<ProviderError> = None;

        for (index, provider) in self.providers.iter().enumerate() {
            let name = provider.name().to_string();
            if index > 0 && !self.attempt_delay.is_zero() {
                tokio::time::sleep(self.attempt_delay).await;
            }
            info!("Trying image model {}/{}: {}", index + 1, total, name);
            attempted.push(name.clone());

            match provider.attempt(request).await {
                Ok(references) if !references.is_empty() => {
                    info!(
                        "Image model {} succeeded with {} reference(s)",
                        name,
                        references.len()
                    );
                    return Ok(ChainSuccess {
                        provider: name,
                        references,
                    });
                }
                Ok(_) => {
                    warn!("Image model {} returned empty output, trying next model", name);
                    last_error = Some(ProviderError::empty_output(&name));
                }
                Err(err) if err.is_rate_limited() => {
                    warn!("Image model {} was rate limited; aborting: {}", name, err);
                    return Err(ChainError::RateLimited(err));
                }
                Err(err) => {
                    warn!(
                        "Image model {} failed ({}), trying next model: {}",
                        name,
                        err.kind.as_str(),
                        err.message
                    );
                    last_error = Some(err);
                }
            }
        }

        warn!("All image models failed: {}", attempted.join(", "));
        Err(ChainError::Exhausted {
            attempted,
            last_error,
        })
    }
}
