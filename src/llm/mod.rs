pub mod error;
pub mod media;
pub mod openai;
pub mod provider;
pub mod replicate;

pub use error::{ProviderError, ProviderErrorKind};
pub use media::{HttpImageFetcher, ImageFetcher, ImageReference, NormalizedImage};
pub use openai::{OpenAiVision, VisionModel};
pub use provider::{GenerationRequest, ImageProvider};
pub use replicate::ReplicateProvider;
