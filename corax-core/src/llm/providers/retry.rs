//! Transient-failure retry for the initial HTTP exchange.
//!
//! Only the request/response handshake retries; once a stream is being
//! consumed the call is committed. The driver itself never re-issues a
//! failed turn, so this is the single place transient upstream hiccups
//! get absorbed.

use reqwest::RequestBuilder;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::super::provider::LlmError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;

fn is_transient(status: u16) -> bool {
    status == 429 || status == 500 || status == 502 || status == 503 || status == 529
}

fn backoff_for(attempt: u32, retry_after: Option<&str>) -> Duration {
    if let Some(seconds) = retry_after.and_then(|value| value.trim().parse::<u64>().ok()) {
        return Duration::from_secs(seconds.min(30));
    }
    Duration::from_millis(BASE_BACKOFF_MS << attempt)
}

/// Send a request, retrying transient failures with exponential backoff.
/// The builder closure must produce an equivalent fresh request per
/// attempt (a consumed `RequestBuilder` cannot be reused).
pub(crate) async fn send_with_retries(
    build: impl Fn() -> RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, LlmError> {
    let mut attempt = 0u32;
    loop {
        let request = build();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = request.send() => result,
        };

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if is_transient(status) && attempt + 1 < MAX_ATTEMPTS {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    let delay = backoff_for(attempt, retry_after.as_deref());
                    warn!(
                        status,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient provider failure; retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(error) => {
                if attempt + 1 < MAX_ATTEMPTS && (error.is_connect() || error.is_timeout()) {
                    let delay = backoff_for(attempt, None);
                    warn!(
                        error = %error,
                        attempt = attempt + 1,
                        "network failure; retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                    continue;
                }
                return Err(error.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_cover_rate_limits_and_server_errors() {
        assert!(is_transient(429));
        assert!(is_transient(500));
        assert!(is_transient(503));
        assert!(!is_transient(400));
        assert!(!is_transient(401));
        assert!(!is_transient(404));
    }

    #[test]
    fn backoff_grows_exponentially_and_honors_retry_after() {
        assert_eq!(backoff_for(0, None), Duration::from_millis(500));
        assert_eq!(backoff_for(1, None), Duration::from_millis(1_000));
        assert_eq!(backoff_for(2, None), Duration::from_millis(2_000));
        assert_eq!(backoff_for(0, Some("7")), Duration::from_secs(7));
        // Malformed headers fall back to the schedule.
        assert_eq!(backoff_for(0, Some("soon")), Duration::from_millis(500));
    }
}
