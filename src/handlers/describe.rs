use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DESCRIPTION_PROMPT;
use crate::error::{AppError, Operation};
use crate::handlers::run_upstream;
use crate::handlers::upload::{read_form, rejection_error};
use crate::llm::media::is_image_mime;
use crate::state::AppState;
use crate::utils::timing::RequestTimer;

const FILE_FIELD: &str = "file";
const EMPTY_DESCRIPTION: &str = "Unable to generate description.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionResponse {
    pub description: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: usize,
    pub upload_date: String,
}

/// Everything after the last dot, lower-cased; the whole name when there is no dot.
fn extension(file_name: &str) -> String {
    file_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn describe_by_extension(file_name: &str) -> String {
    let extension = extension(file_name);
    let label = match extension.as_str() {
        "pdf" => "PDF document".to_string(),
        "doc" | "docx" => "Microsoft Word document".to_string(),
        "xls" | "xlsx" => "Microsoft Excel spreadsheet".to_string(),
        "txt" => "Text file".to_string(),
        "csv" => "Comma-separated values file".to_string(),
        other => format!("{} file", other.to_ascii_uppercase()),
    };
    format!(
        "This is a {label} named \"{file_name}\". Uploaded for reference and documentation purposes."
    )
}

async fn describe_image(
    state: &AppState,
    image: Vec<u8>,
    mime_type: &str,
    file_name: &str,
) -> Result<String, AppError> {
    let vision = state.vision.clone();
    let max_tokens = state.config.description_max_tokens;
    let task_mime = mime_type.to_string();
    let seconds = state.config.describe_timeout_seconds;
    let task = async move {
        vision
            .complete_with_image(
                "describe_document",
                DESCRIPTION_PROMPT,
                &task_mime,
                &image,
                max_tokens,
            )
            .await
    };
    let result = run_upstream(Operation::Describe, seconds, task).await?;

    let description = match result {
        Ok(text) if text.trim().is_empty() => EMPTY_DESCRIPTION.to_string(),
        Ok(text) => text.trim().to_string(),
        Err(err) => {
            warn!("Image description failed for {}: {}", file_name, err);
            format!(
                "Image file: {file_name}. Could not generate AI description: {}",
                err.message
            )
        }
    };
    Ok(description)
}

async fn handle(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<DescriptionResponse, AppError> {
    let config = &state.config;
    if !config.has_openai_key() {
        return Err(AppError::Configuration(
            "OpenAI API key is not configured. Please set OPENAI_API_KEY in your environment variables."
                .to_string(),
        ));
    }

    let limit_label = config.max_upload_label();
    let mut form = read_form(
        multipart.map_err(rejection_error)?,
        FILE_FIELD,
        config.max_upload_bytes,
        &limit_label,
    )
    .await?;

    let Some(file) = form.file.take() else {
        return Err(AppError::MissingFile("No file provided"));
    };
    if file.exceeds(config.max_upload_bytes) {
        return Err(AppError::FileTooLarge(limit_label));
    }

    // Any type is accepted; only images go to the vision model.
    let mime_type = file.mime_type();
    let file_name = form
        .text("fileName")
        .map(str::to_string)
        .or_else(|| file.file_name.clone())
        .unwrap_or_else(|| "document".to_string());
    info!(
        "Describing {} ({}, {} bytes)",
        file_name, mime_type, file.size
    );

    let file_size = file.size;
    let description = if is_image_mime(&mime_type) {
        describe_image(state, file.bytes, &mime_type, &file_name).await?
    } else {
        describe_by_extension(&file_name)
    };

    Ok(DescriptionResponse {
        description,
        file_name,
        file_type: mime_type,
        file_size,
        upload_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

pub async fn generate_document_description(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DescriptionResponse>, AppError> {
    let mut timer = RequestTimer::start("generate-document-description");
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
