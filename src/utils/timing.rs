use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

/// Logged for requests whose handler was dropped before it answered.
const DROPPED_STATUS: u16 = 499;

/// Brackets one HTTP request in the timing log.
#[derive(Debug)]
pub struct RequestTimer {
    endpoint: String,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: u16,
    detail: Option<String>,
    completed: bool,
}

impl RequestTimer {
    pub fn start(endpoint: &str) -> Self {
        let timer = RequestTimer {
            endpoint: endpoint.to_string(),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: DROPPED_STATUS,
            detail: None,
            completed: false,
        };
        info!(
            target: TIMING_TARGET,
            "event=request_received endpoint={} received_at={}",
            timer.endpoint,
            timer.started_at.to_rfc3339()
        );
        timer
    }

    pub fn complete(&mut self, status: u16, detail: Option<String>) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.status = status;
        self.detail = detail;
        info!(
            target: TIMING_TARGET,
            "event=request_completed endpoint={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.endpoint,
            self.started_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            self.started_perf.elapsed().as_secs_f64(),
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }

    /// Closes the record for a request that never produced a response.
    fn abandon(&mut self) {
        self.complete(DROPPED_STATUS, Some("dropped".to_string()));
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.abandon();
    }
}

pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339()
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        status
    );

    result
}
