use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::llm::{ProviderError, ProviderErrorKind};

const RATE_LIMIT_DETAILS: &str =
    "You've made too many requests. Please wait a few minutes and try again.";
const INVALID_KEY_DETAILS: &str =
    "Invalid or missing API key. Please check your environment variables.";
const QUOTA_DETAILS: &str =
    "Your API account has insufficient credits. Please add credits to your account.";

/// JSON body of every failed request.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Which endpoint an unexpected failure belongs to; picks the headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Describe,
    Transform,
}

impl Operation {
    fn failure_label(self) -> &'static str {
        match self {
            Operation::Describe => "Failed to generate description",
            Operation::Transform => "Failed to transform image",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("API configuration error: {0}")]
    Configuration(String),
    #[error("Failed to parse form data: {0}")]
    MalformedForm(String),
    #[error("{0}")]
    MissingFile(&'static str),
    #[error("File size exceeds {0} limit")]
    FileTooLarge(String),
    #[error("{0}")]
    InvalidFileType(String),
    #[error("Invalid surface type: {0:?}")]
    InvalidSurfaceType(String),
    #[error("{operation:?} failed: {source}")]
    Provider {
        operation: Operation,
        #[source]
        source: ProviderError,
    },
    #[error("All image models failed: {0}")]
    ProvidersExhausted(String),
    #[error("{operation:?} did not finish within {seconds} seconds")]
    TimedOut { operation: Operation, seconds: u64 },
    #[error("{operation:?} failed: {source}")]
    Internal {
        operation: Operation,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn provider(operation: Operation, source: ProviderError) -> Self {
        AppError::Provider { operation, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedForm(_)
            | AppError::MissingFile(_)
            | AppError::FileTooLarge(_)
            | AppError::InvalidFileType(_)
            | AppError::InvalidSurfaceType(_) => StatusCode::BAD_REQUEST,
            AppError::Provider { source, .. } if source.is_rate_limited() => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Configuration(_)
            | AppError::Provider { .. }
            | AppError::ProvidersExhausted(_)
            | AppError::TimedOut { .. }
            | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        let (error, details) = match self {
            AppError::Configuration(details) => {
                ("API configuration error".to_string(), Some(details.clone()))
            }
            AppError::MalformedForm(details) => {
                ("Failed to parse form data".to_string(), Some(details.clone()))
            }
            AppError::MissingFile(message) => (message.to_string(), None),
            AppError::FileTooLarge(limit) => (format!("File size exceeds {limit} limit"), None),
            AppError::InvalidFileType(message) => (message.clone(), None),
            AppError::InvalidSurfaceType(value) => (
                "Invalid surface type".to_string(),
                Some(format!(
                    "\"{value}\" is not one of: cabinets, fireplace, deck, room"
                )),
            ),
            AppError::Provider { operation, source } => match source.kind {
                ProviderErrorKind::RateLimited => (
                    "API rate limit exceeded".to_string(),
                    Some(RATE_LIMIT_DETAILS.to_string()),
                ),
                ProviderErrorKind::Unauthorized => (
                    "API configuration error".to_string(),
                    Some(INVALID_KEY_DETAILS.to_string()),
                ),
                ProviderErrorKind::QuotaExceeded => (
                    "Insufficient API quota".to_string(),
                    Some(QUOTA_DETAILS.to_string()),
                ),
                _ => (
                    operation.failure_label().to_string(),
                    Some(source.to_string()),
                ),
            },
            AppError::ProvidersExhausted(details) => (
                Operation::Transform.failure_label().to_string(),
                Some(details.clone()),
            ),
            AppError::TimedOut { operation, seconds } => (
                operation.failure_label().to_string(),
                Some(format!("Request did not finish within {seconds} seconds")),
            ),
            AppError::Internal { operation, source } => (
                operation.failure_label().to_string(),
                Some(source.to_string()),
            ),
        };
        ErrorResponse { error, details }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(self.to_response_body())).into_response()
    }
}
