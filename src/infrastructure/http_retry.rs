use reqwest::{header, Client};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

const INITIAL_BACKOFF_MS: u64 = 500;

/// Check if status code is retryable (500, 502, 503)
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503)
}

/// Shared client settings for outbound provider calls.
pub(crate) fn build_client(
    default_headers: header::HeaderMap,
    timeout: Duration,
) -> Result<Client, TransportError> {
    Client::builder()
        .default_headers(default_headers)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| TransportError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn header_value(value: &str) -> Result<header::HeaderValue, TransportError> {
    header::HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidConfig(format!("Invalid header value: {}", e)))
}

/// Send a request, retrying transport errors and 5xx responses with exponential backoff.
///
/// Non-idempotent calls must pass `max_attempts = 1` or carry an idempotency key.
pub(crate) async fn send_with_retry<F>(
    mut request_builder: F,
    max_attempts: u32,
) -> Result<reqwest::Response, TransportError>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error: Option<String> = None;

    for attempt in 0..max_attempts {
        match request_builder().send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();

                if status == 429 {
                    return Err(TransportError::RateLimited);
                }

                if is_retryable_status(status) && attempt < max_attempts - 1 {
                    sleep(backoff(attempt)).await;
                    continue;
                }

                return Ok(resp);
            }
            Err(e) => {
                last_error = Some(e.to_string());
                if attempt < max_attempts - 1 {
                    sleep(backoff(attempt)).await;
                }
            }
        }
    }

    Err(TransportError::RequestFailed(
        last_error.unwrap_or_else(|| "Max retries exceeded".to_string()),
    ))
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2_u64.pow(attempt))
}

/// Body of a failed response, for logs.
pub(crate) async fn error_body(resp: reqwest::Response) -> String {
    resp.text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_server_errors_are_retried() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(429));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_millis(2000));
    }

    #[test]
    fn header_value_rejects_control_characters() {
        assert!(header_value("Bearer abc").is_ok());
        assert!(header_value("bad\nvalue").is_err());
    }
}
