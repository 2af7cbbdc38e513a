use reqwest::StatusCode;
use serde_json::Value;

use crate::utils::http::truncate_for_log;

const ERROR_BODY_LOG_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    QuotaExceeded,
    Unauthorized,
    EmptyOutput,
    Transport,
    Upstream,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::QuotaExceeded => "quota_exceeded",
            ProviderErrorKind::Unauthorized => "unauthorized",
            ProviderErrorKind::EmptyOutput => "empty_output",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Upstream => "upstream",
        }
    }
}

/// Failure reported by an upstream adapter, already classified.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn upstream(provider: &str, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Upstream, provider, message)
    }

    pub fn empty_output(provider: &str) -> Self {
        Self::new(
            ProviderErrorKind::EmptyOutput,
            provider,
            format!("Model \"{provider}\" returned empty output"),
        )
    }

    pub fn transport(provider: &str, err: &reqwest::Error) -> Self {
        let detail = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        Self::new(ProviderErrorKind::Transport, provider, detail)
    }

    /// Builds an error from a non-success HTTP response body.
    pub fn from_response(provider: &str, status: StatusCode, body: &str) -> Self {
        let parsed = ErrorBody::parse(body);
        let kind = classify_status(status, parsed.code.as_deref());
        let detail = parsed.message.unwrap_or(parsed.summary);
        Self::new(
            kind,
            provider,
            format!("request failed with status {status}: {detail}"),
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == ProviderErrorKind::RateLimited
    }
}

/// Maps an HTTP status plus an optional machine-readable error code to a kind.
///
/// OpenAI reports exhausted credit as `429` with code `insufficient_quota`, so the
/// code wins over the status.
pub fn classify_status(status: StatusCode, code: Option<&str>) -> ProviderErrorKind {
    match code {
        Some("insufficient_quota") | Some("billing_hard_limit_reached") => {
            return ProviderErrorKind::QuotaExceeded
        }
        Some("rate_limit_exceeded") => return ProviderErrorKind::RateLimited,
        Some("invalid_api_key") => return ProviderErrorKind::Unauthorized,
        _ => {}
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        StatusCode::PAYMENT_REQUIRED => ProviderErrorKind::QuotaExceeded,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Unauthorized,
        _ => ProviderErrorKind::Upstream,
    }
}

#[derive(Debug, Default)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    summary: String,
}

impl ErrorBody {
    fn parse(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return ErrorBody {
                summary: "empty response body".to_string(),
                ..ErrorBody::default()
            };
        }

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            return ErrorBody {
                summary: truncate_for_log(trimmed, ERROR_BODY_LOG_LIMIT),
                ..ErrorBody::default()
            };
        };

        let message = ["/error/message", "/detail", "/message", "/error"]
            .iter()
            .find_map(|pointer| value.pointer(pointer).and_then(|v| v.as_str()))
            .map(str::to_string);
        let code = ["/error/code", "/error/type", "/code"]
            .iter()
            .find_map(|pointer| value.pointer(pointer).and_then(|v| v.as_str()))
            .map(str::to_string);

        ErrorBody {
            message,
            code,
            summary: truncate_for_log(&value.to_string(), ERROR_BODY_LOG_LIMIT),
        }
    }
}
