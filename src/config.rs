use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
struct ImageModelsFile {
    models: Vec<ImageModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageModelEntry {
    name: String,
    #[serde(default)]
    params: Option<Map<String, Value>>,
    #[serde(default)]
    supports_byo_openai_key: Option<bool>,
}

/// One image-generation candidate, tried in configured order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageModelConfig {
    /// Replicate identifier, `owner/name` or `owner/name:version`.
    pub name: String,
    /// Static model input merged under the prompt and image.
    pub params: Map<String, Value>,
    pub supports_byo_openai_key: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_vision_model: String,
    pub description_max_tokens: u32,
    pub analysis_max_tokens: u32,
    pub replicate_api_token: String,
    pub replicate_base_url: String,
    pub replicate_poll_attempts: usize,
    pub replicate_poll_interval_ms: u64,
    pub provider_attempt_delay_ms: u64,
    pub max_upload_bytes: usize,
    pub http_timeout_seconds: u64,
    /// Wall-clock limit for one description request.
    pub describe_timeout_seconds: u64,
    /// Wall-clock limit for one transformation, all image models included.
    pub transform_timeout_seconds: u64,
    pub image_models_config_path: PathBuf,
    pub image_models: Vec<ImageModelConfig>,
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

/// `LOG_LEVEL`, readable before the rest of the configuration so logging can start first.
pub fn log_level() -> String {
    env_string("LOG_LEVEL", "info").to_lowercase()
}

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

fn resolve_image_models_path() -> PathBuf {
    match env::var("IMAGE_MODELS_CONFIG_PATH") {
        Ok(value) if !value.trim().is_empty() => {
            let path = PathBuf::from(value.trim());
            if path.is_absolute() {
                path
            } else {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(path)
            }
        }
        _ => PathBuf::from("image_models.json"),
    }
}

fn parse_image_models(raw: &str) -> Result<Vec<ImageModelConfig>> {
    let parsed: ImageModelsFile = serde_json::from_str(raw)?;
    let mut models = Vec::new();
    for entry in parsed.models {
        let name = entry.name.trim();
        if name.is_empty() {
            continue;
        }
        models.push(ImageModelConfig {
            name: name.to_string(),
            params: entry.params.unwrap_or_default(),
            supports_byo_openai_key: entry.supports_byo_openai_key.unwrap_or(false),
        });
    }
    Ok(models)
}

fn load_image_models_from_path(path: &Path) -> Vec<ImageModelConfig> {
    if !path.exists() {
        info!("Image model config not found at {}", path.display());
        return Vec::new();
    }

    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read image model config at {}: {}",
                path.display(),
                err
            );
            return Vec::new();
        }
    };

    match parse_image_models(&raw) {
        Ok(models) => models,
        Err(err) => {
            warn!(
                "Failed to parse image model config at {}: {}",
                path.display(),
                err
            );
            Vec::new()
        }
    }
}

fn img2img_params() -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("strength".to_string(), json!(0.6));
    params.insert("num_outputs".to_string(), json!(1));
    params.insert("guidance_scale".to_string(), json!(7.5));
    params.insert("num_inference_steps".to_string(), json!(50));
    params
}

pub fn default_image_models() -> Vec<ImageModelConfig> {
    vec![
        ImageModelConfig {
            name: "openai/gpt-image-1".to_string(),
            params: Map::new(),
            supports_byo_openai_key: true,
        },
        ImageModelConfig {
            name: "stability-ai/stable-diffusion-img2img".to_string(),
            params: img2img_params(),
            supports_byo_openai_key: false,
        },
        ImageModelConfig {
            name: "stability-ai/sdxl:39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b"
                .to_string(),
            params: img2img_params(),
            supports_byo_openai_key: false,
        },
    ]
}

fn build_image_models(path: &Path) -> Vec<ImageModelConfig> {
    let models = load_image_models_from_path(path);
    if !models.is_empty() {
        info!(
            "Loaded {} image model(s) from {}",
            models.len(),
            path.display()
        );
        return models;
    }
    let defaults = default_image_models();
    info!("Using {} built-in image model(s)", defaults.len());
    defaults
}

impl Config {
    pub fn load() -> Result<Self> {
        let image_models_config_path = resolve_image_models_path();
        let image_models = build_image_models(&image_models_config_path);

        let max_upload_bytes = env_usize("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES);
        if max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_BYTES must be greater than zero"));
        }

        Ok(Config {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:3000"),
            openai_api_key: env_string("OPENAI_API_KEY", ""),
            openai_base_url: env_string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_vision_model: env_string("OPENAI_VISION_MODEL", "gpt-4o"),
            description_max_tokens: env_u32("DESCRIPTION_MAX_TOKENS", 300),
            analysis_max_tokens: env_u32("ANALYSIS_MAX_TOKENS", 200),
            replicate_api_token: env_string("REPLICATE_API_TOKEN", ""),
            replicate_base_url: env_string(
                "REPLICATE_BASE_URL",
                "https://api.replicate.com/v1",
            ),
            replicate_poll_attempts: env_usize("REPLICATE_POLL_ATTEMPTS", 30),
            replicate_poll_interval_ms: env_u64("REPLICATE_POLL_INTERVAL_MS", 2000),
            provider_attempt_delay_ms: env_u64("PROVIDER_ATTEMPT_DELAY_MS", 1000),
            max_upload_bytes,
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 60),
            describe_timeout_seconds: env_u64("DESCRIBE_TIMEOUT_SECONDS", 30).max(1),
            transform_timeout_seconds: env_u64("TRANSFORM_TIMEOUT_SECONDS", 60).max(1),
            image_models_config_path,
            image_models,
        })
    }

    pub fn has_openai_key(&self) -> bool {
        !self.openai_api_key.trim().is_empty()
    }

    pub fn has_replicate_token(&self) -> bool {
        !self.replicate_api_token.trim().is_empty()
    }

    /// Upload limit rendered the way clients see it, e.g. `10MB`.
    pub fn max_upload_label(&self) -> String {
        const KIB: usize = 1024;
        const MIB: usize = 1024 * 1024;
        let bytes = self.max_upload_bytes;
        if bytes % MIB == 0 {
            format!("{}MB", bytes / MIB)
        } else if bytes % KIB == 0 {
            format!("{}KB", bytes / KIB)
        } else {
            format!("{bytes} bytes")
        }
    }
}

#[cfg(test)]
impl Config {
    /// Fully populated configuration with no environment lookups.
    pub fn for_tests() -> Self {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            openai_api_key: "sk-test".to_string(),
            openai_base_url: "http://127.0.0.1:9/v1".to_string(),
            openai_vision_model: "gpt-4o".to_string(),
            description_max_tokens: 300,
            analysis_max_tokens: 200,
            replicate_api_token: "r8-test".to_string(),
            replicate_base_url: "http://127.0.0.1:9/v1".to_string(),
            replicate_poll_attempts: 1,
            replicate_poll_interval_ms: 0,
            provider_attempt_delay_ms: 0,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            http_timeout_seconds: 5,
            describe_timeout_seconds: 30,
            transform_timeout_seconds: 60,
            image_models_config_path: PathBuf::from("image_models.json"),
            image_models: default_image_models(),
        }
    }
}

pub const DESCRIPTION_PROMPT: &str = "Analyze this image and provide a detailed, professional description of what you see. Focus on:\n- The main subject matter and composition\n- Visual elements, colors, materials, and textures\n- Style, design elements, and aesthetic qualities\n- Any notable details or features\n- Overall context and purpose\n\nProvide a comprehensive description in 2-4 sentences that would be useful for document organization and search.";

pub const CABINETS_TEMPLATE: &str = r#"Professional cabinet refinishing transformation:
- If cabinets are dark (brown, black, dark wood): Transform to bright, light finishes like crisp white, soft cream, or light gray with modern shaker-style doors. Add contemporary matte black or brushed nickel hardware.
- If cabinets are light (white, cream, light wood): Transform to rich, warm finishes like deep espresso, charcoal gray, or warm walnut tones. Add elegant gold or bronze hardware.
- Apply realistic wood grain texture and professional-grade finish.
- Maintain exact cabinet structure, layout, and perspective.
- Create a dramatic but tasteful aesthetic transformation that shows clear before/after contrast."#;

pub const FIREPLACE_TEMPLATE: &str = r#"Modern fireplace makeover transformation:
- If fireplace is dark or dated: Transform to light, modern finishes like white shiplap, light gray stone, or clean white tile. Add a floating wood or white mantel shelf.
- If fireplace is light or plain: Transform to rich, dramatic finishes like dark slate, charcoal stone, or deep gray tile. Add a substantial dark wood or black mantel.
- Maintain exact fireplace structure, size, and proportions.
- Enhance with subtle ambient lighting.
- Create a striking visual transformation that modernizes the space."#;

pub const DECK_TEMPLATE: &str = r#"Professional deck refinishing transformation:
- If deck is dark or weathered: Transform to light, fresh finishes like light gray composite decking, white-washed wood, or natural light wood tones. Add modern black or white railings.
- If deck is light or faded: Transform to rich, warm finishes like dark brown composite, rich cedar tones, or deep mahogany. Add elegant dark railings.
- Maintain exact deck structure, layout, and perspective.
- Apply realistic wood grain texture with proper board spacing.
- Create a dramatic restoration that shows clear improvement."#;

pub const ROOM_TEMPLATE: &str = r#"Professional interior refinishing transformation:
- If room is dark: Transform to bright, airy finishes with light paint colors, white trim, and light-toned surfaces. Add modern light fixtures.
- If room is light: Transform to rich, cozy finishes with warm paint colors, dark accents, and deeper-toned surfaces. Add warm ambient lighting.
- Maintain exact room structure, layout, and perspective.
- Update surfaces with professional-grade finishes.
- Create a dramatic but tasteful aesthetic transformation."#;

pub const ANALYSIS_REQUIREMENTS: &str = r#"ABSOLUTE REQUIREMENTS - DO NOT CHANGE ANYTHING EXCEPT SURFACE FINISHES:
- Exact same layout, room structure, and architectural elements
- Same perspective, camera angle, and composition
- Same appliances, fixtures, and furniture (DO NOT ADD OR REMOVE ANYTHING)
- Same window positions, sizes, and styles
- Same floor, walls, and ceiling (keep exactly as is)
- Same countertops, backsplash, and all other surfaces (unless they're the refinishing target)
- Same decorative items, plants, utensils - EVERYTHING stays in the same position
- Same lighting conditions and shadows"#;

pub const GENERATION_SUFFIX: &str = "Maintain the exact same structure, layout, perspective, furniture, appliances, and all elements. Change ONLY the surface finishes and colors as specified. Photorealistic result with high quality, realistic lighting.";
