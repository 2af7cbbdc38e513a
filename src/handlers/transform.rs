use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, Operation};
use crate::handlers::run_upstream;
use crate::handlers::upload::{read_form, rejection_error};
use crate::llm::media::is_image_mime;
use crate::refinish::pipeline::TransformationRequest;
use crate::refinish::surface::{normalize_directions, SurfaceType};
use crate::state::AppState;
use crate::utils::timing::RequestTimer;

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    pub transformed_image: String,
    pub mime_type: String,
    pub description: String,
    pub note: String,
    pub transformation_description: String,
}

/// Checks credentials and every form rule; nothing upstream is called until this passes.
async fn validate(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<TransformationRequest, AppError> {
    let config = &state.config;
    if !config.has_openai_key() {
        return Err(AppError::Configuration(
            "OpenAI API key is not configured. Please set OPENAI_API_KEY in your environment variables."
                .to_string(),
        ));
    }
    if !config.has_replicate_token() {
        return Err(AppError::Configuration(
            "Replicate API token is not configured. Please set REPLICATE_API_TOKEN in your environment variables."
                .to_string(),
        ));
    }

    let limit_label = config.max_upload_label();
    let mut form = read_form(
        multipart.map_err(rejection_error)?,
        IMAGE_FIELD,
        config.max_upload_bytes,
        &limit_label,
    )
    .await?;

    let Some(file) = form.file.take() else {
        return Err(AppError::MissingFile("No image provided"));
    };
    let surface: SurfaceType = form.text("surfaceType").unwrap_or_default().parse()?;

    let mime_type = file.mime_type();
    if !is_image_mime(&mime_type) {
        return Err(AppError::InvalidFileType(
            "Invalid file type. Only images are allowed.".to_string(),
        ));
    }
    if file.exceeds(config.max_upload_bytes) {
        return Err(AppError::FileTooLarge(limit_label));
    }

    Ok(TransformationRequest {
        surface,
        image: file.bytes,
        mime_type,
        custom_directions: normalize_directions(form.text("customDirections")),
    })
}

async fn handle(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<TransformResponse, AppError> {
    let request = validate(state, multipart).await?;
    info!(
        "Transforming {} image ({} bytes, custom directions: {})",
        request.surface,
        request.image.len(),
        request.has_custom_directions()
    );

    let pipeline = state.pipeline.clone();
    let surface = request.surface;
    let outcome = run_upstream(
        Operation::Transform,
        state.config.transform_timeout_seconds,
        async move { pipeline.run(&request).await },
    )
    .await??;
    info!(
        "Transformation of {} finished with {}",
        surface, outcome.provider
    );

    Ok(TransformResponse {
        transformed_image: outcome.image.base64,
        mime_type: outcome.image.mime_type,
        description: format!("Transformed {} using {}", surface, outcome.provider),
        note: format!("Image generated with {}", outcome.provider),
        transformation_description: outcome.transformation_description,
    })
}

pub async fn transform_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TransformResponse>, AppError> {
    let mut timer = RequestTimer::start("transform-image");
    match handle(&state, multipart).await {
        Ok(response) => {
            timer.complete(200, None);
            Ok(Json(response))
        }
        Err(err) => {
            timer.complete(err.status().as_u16(), Some(err.to_string()));
            Err(err)
        }
    }
}
