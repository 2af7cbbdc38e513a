use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::Client;
use tracing::warn;

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|err| {
            warn!("Failed to build tuned HTTP client, using defaults: {err}");
            Client::new()
        })
}

/// Sets the shared client timeout. Only the first call has an effect.
pub fn init_http_client(timeout_seconds: u64) {
    let timeout = Duration::from_secs(timeout_seconds.max(1));
    if HTTP_CLIENT.set(build_client(timeout)).is_err() {
        warn!("HTTP client already initialised; ignoring new timeout");
    }
}

pub fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| build_client(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
}

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}
