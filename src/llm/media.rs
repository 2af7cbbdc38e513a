use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::llm::error::{ProviderError, ProviderErrorKind};
use crate::utils::http::{get_http_client, truncate_for_log};

pub const DEFAULT_IMAGE_MIME: &str = "image/png";
const DOWNLOAD_PROVIDER: &str = "image-download";

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.trim().to_ascii_lowercase().starts_with("image/")
}

/// Drops parameters such as `; charset=binary` from a content type.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

pub fn to_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(bytes)
    )
}

/// A usable pointer to a generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    DataUri { mime_type: String, base64: String },
    Url(String),
    Inline { mime_type: String, bytes: Vec<u8> },
}

impl ImageReference {
    /// Accepts `data:<mime>;base64,<payload>` and absolute http(s) URLs.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if let Some(rest) = value.strip_prefix("data:") {
            let (header, payload) = rest.split_once(',')?;
            let header = header.strip_suffix(";base64")?;
            if payload.is_empty() {
                return None;
            }
            let mime_type = essence(header);
            let mime_type = if mime_type.is_empty() {
                DEFAULT_IMAGE_MIME.to_string()
            } else {
                mime_type
            };
            return Some(ImageReference::DataUri {
                mime_type,
                base64: payload.to_string(),
            });
        }

        let parsed = url::Url::parse(value).ok()?;
        match parsed.scheme() {
            "http" | "https" => Some(ImageReference::Url(value.to_string())),
            _ => None,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            ImageReference::DataUri { .. } => "data-uri",
            ImageReference::Url(_) => "url",
            ImageReference::Inline { .. } => "inline",
        }
    }
}

/// The single base64 payload returned to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub base64: String,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, ProviderError>;
}

/// At most one retry per download.
const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 2;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn has_attempts_left(attempt: usize) -> bool {
    attempt + 1 < MEDIA_DOWNLOAD_MAX_ATTEMPTS
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt)
}

/// Downloads generated images over the shared client. Transport hiccups and 5xx
/// responses get one retry after a short delay; everything else fails immediately.
#[derive(Debug, Clone, Default)]
pub struct HttpImageFetcher;

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, ProviderError> {
        let client = get_http_client();
        let mut attempt = 0;
        loop {
            let response = match client.get(url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(
                        "Failed to fetch image {url}: {err} (timeout={}, connect={}, attempt={}/{})",
                        err.is_timeout(),
                        err.is_connect(),
                        attempt + 1,
                        MEDIA_DOWNLOAD_MAX_ATTEMPTS
                    );
                    if !should_retry_error(&err) || !has_attempts_left(attempt) {
                        return Err(ProviderError::transport(DOWNLOAD_PROVIDER, &err));
                    }
                    tokio::time::sleep(retry_delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "Image download failed for {url} with status {}: {}",
                    status,
                    truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
                );
                if !should_retry_status(status) || !has_attempts_left(attempt) {
                    return Err(ProviderError::from_response(DOWNLOAD_PROVIDER, status, &body));
                }
                tokio::time::sleep(retry_delay(attempt)).await;
                attempt += 1;
                continue;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let bytes = response
                .bytes()
                .await
                .map_err(|err| ProviderError::transport(DOWNLOAD_PROVIDER, &err))?;
            debug!("Downloaded {} bytes from {url}", bytes.len());
            return Ok(FetchedImage {
                bytes: bytes.to_vec(),
                content_type,
            });
        }
    }
}

/// Turns a winning reference into the response payload. Data URIs pass through
/// untouched; URLs are fetched exactly once through `fetcher`.
pub async fn resolve_reference(
    reference: &ImageReference,
    fetcher: &dyn ImageFetcher,
) -> Result<NormalizedImage, ProviderError> {
    match reference {
        ImageReference::DataUri { mime_type, base64 } => Ok(NormalizedImage {
            base64: base64.clone(),
            mime_type: mime_type.clone(),
        }),
        ImageReference::Inline { mime_type, bytes } => Ok(NormalizedImage {
            base64: general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.clone(),
        }),
        ImageReference::Url(url) => {
            let fetched = fetcher.fetch(url).await?;
            if fetched.bytes.is_empty() {
                return Err(ProviderError::new(
                    ProviderErrorKind::EmptyOutput,
                    DOWNLOAD_PROVIDER,
                    format!("downloaded image from {url} was empty"),
                ));
            }
            let mime_type = fetched
                .content_type
                .as_deref()
                .map(essence)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
            Ok(NormalizedImage {
                base64: general_purpose::STANDARD.encode(&fetched.bytes),
                mime_type,
            })
        }
    }
}
