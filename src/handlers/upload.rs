use std::collections::HashMap;

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::Multipart;
use axum::http::StatusCode;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::llm::media::{detect_mime_type, essence};

const OCTET_STREAM: &str = "application/octet-stream";

/// A file part read from a multipart form.
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub declared_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Bytes seen on the wire. `bytes` stops growing once this passes the limit.
    pub size: usize,
}

impl UploadedFile {
    pub fn exceeds(&self, limit: usize) -> bool {
        self.size > limit
    }

    /// Declared media type, or sniffed from magic bytes when the client sent none.
    pub fn mime_type(&self) -> String {
        let declared = self
            .declared_type
            .as_deref()
            .map(essence)
            .unwrap_or_default();
        if !declared.is_empty() && declared != OCTET_STREAM {
            return declared;
        }
        detect_mime_type(&self.bytes).unwrap_or_else(|| OCTET_STREAM.to_string())
    }
}

#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    /// Trimmed text field; blank values count as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

pub fn rejection_error(rejection: MultipartRejection) -> AppError {
    AppError::MalformedForm(rejection.body_text())
}

fn multipart_error(err: MultipartError, limit_label: &str) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::FileTooLarge(limit_label.to_string());
    }
    AppError::MalformedForm(err.body_text())
}

async fn read_file(
    mut field: Field<'_>,
    limit: usize,
    limit_label: &str,
) -> Result<UploadedFile, AppError> {
    let mut file = UploadedFile {
        file_name: field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty()),
        declared_type: field.content_type().map(str::to_string),
        ..UploadedFile::default()
    };

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| multipart_error(err, limit_label))?
    {
        file.size += chunk.len();
        if file.size <= limit {
            file.bytes.extend_from_slice(&chunk);
        }
    }

    if file.exceeds(limit) {
        warn!(
            "Upload {:?} is {} bytes, over the {} byte limit",
            file.file_name, file.size, limit
        );
    }
    Ok(file)
}

/// Reads every part of the form. Only the part named `file_field` is kept as a
/// file; its size is counted chunk by chunk and at most `limit` bytes are kept.
pub async fn read_form(
    mut multipart: Multipart,
    file_field: &str,
    limit: usize,
    limit_label: &str,
) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit_label))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == file_field {
            let file = read_file(field, limit, limit_label).await?;
            // Browsers send an empty unnamed part when nothing was selected.
            if file.size == 0 && file.file_name.is_none() {
                continue;
            }
            form.file = Some(file);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|err| multipart_error(err, limit_label))?;
        form.fields.insert(name, value);
    }

    debug!(
        "Parsed form: file={} fields={:?}",
        form.file.is_some(),
        form.fields.keys().collect::<Vec<_>>()
    );
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_wins_over_sniffing() {
        let file = UploadedFile {
            declared_type: Some("image/jpeg; charset=binary".to_string()),
            bytes: b"%PDF-1.7".to_vec(),
            ..UploadedFile::default()
        };
        assert_eq!(file.mime_type(), "image/jpeg");
    }

    #[test]
    fn octet_stream_is_sniffed() {
        let file = UploadedFile {
            declared_type: Some(OCTET_STREAM.to_string()),
            bytes: b"%PDF-1.7\n%....".to_vec(),
            ..UploadedFile::default()
        };
        assert_eq!(file.mime_type(), "application/pdf");
    }

    #[test]
    fn unknown_bytes_stay_octet_stream() {
        let file = UploadedFile {
            bytes: vec![0, 1, 2],
            ..UploadedFile::default()
        };
        assert_eq!(file.mime_type(), OCTET_STREAM);
    }

    #[test]
    fn blank_text_fields_are_absent() {
        let mut form = UploadForm::default();
        form.fields.insert("customDirections".to_string(), "   ".to_string());
        form.fields.insert("surfaceType".to_string(), " deck ".to_string());
        assert_eq!(form.text("customDirections"), None);
        assert_eq!(form.text("surfaceType"), Some("deck"));
        assert_eq!(form.text("missing"), None);
    }
}
