//! Response classification and bounded retry for vendor calls.

use crate::error::{RemoteError, RemoteResult};
use crate::types::ApiErrorBody;
use reqwest::{Response, StatusCode};
use std::time::Duration;

/// Turn a non-success vendor response into the matching error class.
///
/// 429 and 503 carry an optional Retry-After the caller must honor; 401 means
/// the token expired and a fresh authorization may fix it; 408 and 5xx are
/// transient; remaining 4xx are terminal.
pub async fn classify_failure(response: Response) -> RemoteError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body: ApiErrorBody = response.json().await.unwrap_or(ApiErrorBody {
        code: "unknown".to_string(),
        message: String::new(),
    });

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            RemoteError::RateLimited { retry_after }
        }
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized(body.message),
        StatusCode::REQUEST_TIMEOUT => RemoteError::Transient {
            status: status.as_u16(),
            message: body.message,
        },
        s if s.is_server_error() => RemoteError::Transient {
            status: status.as_u16(),
            message: body.message,
        },
        s => RemoteError::Rejected {
            status: s.as_u16(),
            code: body.code,
            message: body.message,
        },
    }
}

/// Run `op` up to `attempts` times, sleeping between retryable failures.
///
/// A server-mandated Retry-After overrides the configured delay. Terminal
/// errors and the final attempt's error are returned as-is.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let pause = err.mandated_delay().unwrap_or(delay);
                tracing::debug!(
                    attempt,
                    error = %err,
                    pause_ms = pause.as_millis() as u64,
                    "retrying remote call"
                );
                tokio::time::sleep(pause).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    // attempts >= 1 means the loop always returned or stored an error.
    Err(last_err.unwrap_or(RemoteError::Transient {
        status: 0,
        message: "retry loop exhausted".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RemoteError::Transient {
                        status: 500,
                        message: "boom".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_two_rate_limits_then_success_within_budget() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RemoteError::RateLimited {
                        retry_after: Some(Duration::from_millis(1)),
                    })
                } else {
                    Ok("stored")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "stored");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<()> = with_retry(5, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RemoteError::Rejected {
                    status: 400,
                    code: "bad_request".into(),
                    message: "nope".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_budget_is_exhausted() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<()> = with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RemoteError::Transient {
                    status: 503,
                    message: "busy".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
