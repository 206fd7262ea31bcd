use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Authorization token was rejected or has expired.
    #[error("remote authorization failed: {0}")]
    Unauthorized(String),

    /// The vendor asked us to back off.
    #[error("remote rate limit hit, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Non-success response that is worth retrying (408, 5xx).
    #[error("transient remote failure ({status}): {message}")]
    Transient { status: u16, message: String },

    /// Non-success response that will not get better on retry (4xx).
    #[error("remote request rejected ({status}, {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The configured bucket does not exist on the account.
    #[error("bucket {0:?} not found on remote account")]
    BucketNotFound(String),

    /// Uploaded object does not match what we sent.
    #[error("remote size mismatch for {file_id}: expected {expected}, remote reports {actual}")]
    SizeMismatch {
        file_id: String,
        expected: u64,
        actual: u64,
    },

    /// The client-side hourly budget for this call kind is exhausted.
    #[error("hourly call budget exhausted for {0}")]
    BudgetExhausted(&'static str),

    #[error("remote transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote response decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RemoteError {
    /// Whether a fresh attempt at the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::RateLimited { .. } => true,
            Self::Transient { .. } => true,
            Self::Transport(e) => !e.is_builder() && !e.is_body(),
            Self::Rejected { .. }
            | Self::BucketNotFound(_)
            | Self::SizeMismatch { .. }
            | Self::BudgetExhausted(_)
            | Self::Decode(_) => false,
        }
    }

    /// Back-off the server mandated, if any.
    pub fn mandated_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(RemoteError::Unauthorized("expired".into()).is_retryable());
        assert!(
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
            .is_retryable()
        );
        assert!(
            RemoteError::Transient {
                status: 503,
                message: "busy".into()
            }
            .is_retryable()
        );
        assert!(
            !RemoteError::Rejected {
                status: 400,
                code: "bad_request".into(),
                message: "nope".into()
            }
            .is_retryable()
        );
        assert!(!RemoteError::BucketNotFound("archive".into()).is_retryable());
        assert!(!RemoteError::BudgetExhausted("upload_part").is_retryable());
    }
}
