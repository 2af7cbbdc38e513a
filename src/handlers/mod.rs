pub mod describe;
pub mod transform;
pub mod upload;

use std::future::Future;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{AppError, Operation};
use crate::state::AppState;

/// Multipart framing and text fields on top of the file itself.
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

/// Aborts the task when the handle goes out of scope.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs upstream work on its own task with a wall-clock limit.
///
/// The task is aborted when the limit passes or when the handler future is
/// dropped because the client disconnected.
pub(crate) async fn run_upstream<F>(
    operation: Operation,
    seconds: u64,
    work: F,
) -> Result<F::Output, AppError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(work));
    match tokio::time::timeout(Duration::from_secs(seconds), &mut task.0).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(AppError::Internal {
            operation,
            source: anyhow::Error::new(err),
        }),
        Err(_) => {
            warn!("{:?} cancelled after {} seconds", operation, seconds);
            Err(AppError::TimedOut { operation, seconds })
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(BODY_LIMIT_OVERHEAD);

    Router::new()
        .route(
            "/api/generate-document-description",
            post(describe::generate_document_description),
        )
        .route("/api/transform-image", post(transform::transform_image))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::llm::ProviderErrorKind;
    use crate::testing::{
        fake_state, FakeFetcher, FakeProvider, FakeVision, MultipartBody, ProviderScript,
    };

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    fn small_upload_config() -> Config {
        let mut config = Config::for_tests();
        config.max_upload_bytes = 1024;
        config
    }

    async fn send(router: Router, uri: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, MultipartBody::content_type())
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn oversized_description_upload_is_rejected_before_any_call() {
        let vision = FakeVision::replying("unused");
        let router = build_router(fake_state(
            small_upload_config(),
            vision.clone(),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "big.png", "image/png", &[0u8; 2048])
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({ "error": "File size exceeds 1KB limit" }));
        assert_eq!(vision.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_transform_upload_is_rejected_before_any_call() {
        let vision = FakeVision::replying("unused");
        let provider = FakeProvider::new("owner/only", ProviderScript::Output("https://x.test/a.png"));
        let router = build_router(fake_state(
            small_upload_config(),
            vision.clone(),
            &[provider.clone()],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .text("surfaceType", "deck")
            .file("image", "deck.jpg", "image/jpeg", &[0u8; 4096])
            .finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "File size exceeds 1KB limit");
        assert_eq!((vision.calls(), provider.calls()), (0, 0));
    }

    #[tokio::test]
    async fn non_image_description_comes_from_the_extension() {
        let vision = FakeVision::replying("unused");
        let router = build_router(fake_state(
            Config::for_tests(),
            vision.clone(),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "upload.bin", "application/pdf", b"%PDF-1.7 body")
            .text("fileName", "Kitchen quote.pdf")
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["description"],
            "This is a PDF document named \"Kitchen quote.pdf\". Uploaded for reference and documentation purposes."
        );
        assert_eq!(json["fileName"], "Kitchen quote.pdf");
        assert_eq!(json["fileType"], "application/pdf");
        assert_eq!(json["fileSize"], 13);
        assert!(json["uploadDate"].as_str().unwrap().ends_with('Z'));
        assert_eq!(vision.calls(), 0);
    }

    #[tokio::test]
    async fn image_description_uses_the_vision_model() {
        let vision = FakeVision::replying("  A white shaker kitchen with brass pulls.  ");
        let router = build_router(fake_state(
            Config::for_tests(),
            vision.clone(),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "kitchen.jpg", "image/jpeg", JPEG)
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["description"], "A white shaker kitchen with brass pulls.");
        assert_eq!(json["fileName"], "kitchen.jpg");
        assert_eq!(vision.calls(), 1);
        assert!(vision.prompts()[0].starts_with("Analyze this image"));
    }

    #[tokio::test]
    async fn image_description_degrades_when_the_model_fails() {
        let vision = FakeVision::failing(ProviderErrorKind::Upstream);
        let router = build_router(fake_state(
            Config::for_tests(),
            vision,
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "kitchen.jpg", "image/jpeg", JPEG)
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["description"],
            "Image file: kitchen.jpg. Could not generate AI description: scripted failure"
        );
    }

    #[tokio::test]
    async fn description_accepts_any_document_type() {
        let vision = FakeVision::replying("unused");
        let router = build_router(fake_state(
            Config::for_tests(),
            vision.clone(),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "archive.zip", "application/zip", b"PK\x03\x04")
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["description"],
            "This is a ZIP file named \"archive.zip\". Uploaded for reference and documentation purposes."
        );
        assert_eq!(json["fileType"], "application/zip");
        assert_eq!(vision.calls(), 0);
    }

    #[tokio::test]
    async fn octet_stream_text_file_is_described_by_extension() {
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("unused"),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "notes.txt", "application/octet-stream", b"paint codes: SW 7008")
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["description"],
            "This is a Text file named \"notes.txt\". Uploaded for reference and documentation purposes."
        );
        assert_eq!(json["fileType"], "application/octet-stream");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_description_fails_after_the_time_limit() {
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::stalling(),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "kitchen.jpg", "image/jpeg", JPEG)
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json,
            json!({
                "error": "Failed to generate description",
                "details": "Request did not finish within 30 seconds",
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_transformation_fails_after_the_time_limit() {
        let stalled = FakeProvider::new("owner/stalled", ProviderScript::Stall);
        let next = FakeProvider::new("owner/next", ProviderScript::Output("https://x.test/n.png"));
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("Stain the deck gray."),
            &[stalled.clone(), next.clone()],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .text("surfaceType", "deck")
            .file("image", "deck.jpg", "image/jpeg", JPEG)
            .finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json,
            json!({
                "error": "Failed to transform image",
                "details": "Request did not finish within 60 seconds",
            })
        );
        assert_eq!((stalled.calls(), next.calls()), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_work_is_aborted() {
        let held = std::sync::Arc::new(());
        let task_held = held.clone();
        let result = run_upstream(Operation::Transform, 5, async move {
            let _held = task_held;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .await;
        assert!(matches!(result, Err(AppError::TimedOut { seconds: 5, .. })));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(std::sync::Arc::strong_count(&held), 1);
    }

    #[tokio::test]
    async fn missing_file_is_a_bad_request() {
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("unused"),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new().text("fileName", "nothing.pdf").finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({ "error": "No file provided" }));
    }

    #[tokio::test]
    async fn invalid_surface_type_makes_no_calls() {
        let vision = FakeVision::replying("unused");
        let provider = FakeProvider::new("owner/only", ProviderScript::Output("https://x.test/a.png"));
        let router = build_router(fake_state(
            Config::for_tests(),
            vision.clone(),
            &[provider.clone()],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("image", "roof.jpg", "image/jpeg", JPEG)
            .text("surfaceType", "roof")
            .finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid surface type");
        assert_eq!((vision.calls(), provider.calls()), (0, 0));
    }

    #[tokio::test]
    async fn missing_image_is_a_bad_request() {
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("unused"),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new().text("surfaceType", "deck").finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({ "error": "No image provided" }));
    }

    #[tokio::test]
    async fn non_image_transform_upload_is_rejected() {
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("unused"),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .text("surfaceType", "room")
            .file("image", "plan.pdf", "application/pdf", b"%PDF-1.7")
            .finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid file type. Only images are allowed.");
    }

    #[tokio::test]
    async fn missing_replicate_token_is_a_configuration_error() {
        let mut config = Config::for_tests();
        config.replicate_api_token = String::new();
        let vision = FakeVision::replying("unused");
        let router = build_router(fake_state(
            config,
            vision.clone(),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .text("surfaceType", "deck")
            .file("image", "deck.jpg", "image/jpeg", JPEG)
            .finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "API configuration error");
        assert!(json["details"].as_str().unwrap().contains("REPLICATE_API_TOKEN"));
        assert_eq!(vision.calls(), 0);
    }

    #[tokio::test]
    async fn missing_openai_key_blocks_descriptions() {
        let mut config = Config::for_tests();
        config.openai_api_key = "  ".to_string();
        let router = build_router(fake_state(
            config,
            FakeVision::replying("unused"),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .file("file", "a.pdf", "application/pdf", b"%PDF-1.7")
            .finish();

        let (status, json) = send(router, "/api/generate-document-description", body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "API configuration error");
    }

    #[tokio::test]
    async fn rate_limited_provider_returns_429_and_stops() {
        let first = FakeProvider::new("owner/first", ProviderScript::Empty);
        let second = FakeProvider::new(
            "owner/second",
            ProviderScript::Fail(ProviderErrorKind::RateLimited),
        );
        let third = FakeProvider::new("owner/third", ProviderScript::Output("https://x.test/3.png"));
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("Lighten the cabinets."),
            &[first, second, third.clone()],
            FakeFetcher::new(Vec::new(), None),
        ));
        let body = MultipartBody::new()
            .text("surfaceType", "cabinets")
            .file("image", "kitchen.jpg", "image/jpeg", JPEG)
            .finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["error"], "API rate limit exceeded");
        assert_eq!(third.calls(), 0);
    }

    #[tokio::test]
    async fn deck_transformation_end_to_end() {
        let vision = FakeVision::replying("The deck is weathered and dark. Refinish it in light gray composite.");
        let first = FakeProvider::new("owner/first", ProviderScript::Empty);
        let second = FakeProvider::new(
            "owner/second",
            ProviderScript::Output("data:image/webp;base64,UklGRg=="),
        );
        let fetcher = FakeFetcher::new(Vec::new(), None);
        let router = build_router(fake_state(
            Config::for_tests(),
            vision.clone(),
            &[first.clone(), second.clone()],
            fetcher.clone(),
        ));
        let body = MultipartBody::new()
            .text("surfaceType", "deck")
            .text("customDirections", "   ")
            .file("image", "deck.jpg", "image/jpeg", JPEG)
            .finish();

        let (status, json) = send(router, "/api/transform-image", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            json!({
                "transformedImage": "UklGRg==",
                "mimeType": "image/webp",
                "description": "Transformed deck using owner/second",
                "note": "Image generated with owner/second",
                "transformationDescription": "The deck is weathered and dark. Refinish it in light gray composite.",
            })
        );
        assert_eq!((first.calls(), second.calls(), fetcher.calls()), (1, 1, 0));
        assert!(vision.prompts()[0].contains("Professional deck refinishing transformation"));
    }

    #[tokio::test]
    async fn non_multipart_body_is_a_form_error() {
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("unused"),
            &[],
            FakeFetcher::new(Vec::new(), None),
        ));
        let request = Request::builder()
            .method("POST")
            .uri("/api/transform-image")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "Failed to parse form data");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let router = build_router(fake_state(
            Config::for_tests(),
            FakeVision::replying("unused"),
            &[],
            FakeFetcher::failing(),
        ));
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
    }
}
