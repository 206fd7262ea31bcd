//! Client-side hourly budget per vendor call kind.
//!
//! The vendor bills and throttles per transaction class, so the caller keeps
//! its own counter and refuses locally before the vendor has to.

use crate::error::{RemoteError, RemoteResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Authorize,
    GetUploadUrl,
    UploadFile,
    StartLargeFile,
    GetPartUrl,
    UploadPart,
    FinishLargeFile,
    CancelLargeFile,
    ListFiles,
    DeleteFileVersion,
    GetFileInfo,
    CopyFile,
    DownloadAuth,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize_account",
            Self::GetUploadUrl => "get_upload_url",
            Self::UploadFile => "upload_file",
            Self::StartLargeFile => "start_large_file",
            Self::GetPartUrl => "get_upload_part_url",
            Self::UploadPart => "upload_part",
            Self::FinishLargeFile => "finish_large_file",
            Self::CancelLargeFile => "cancel_large_file",
            Self::ListFiles => "list_file_names",
            Self::DeleteFileVersion => "delete_file_version",
            Self::GetFileInfo => "get_file_info",
            Self::CopyFile => "copy_file",
            Self::DownloadAuth => "get_download_authorization",
        }
    }
}

/// Sliding-window counter over the last hour, one window per call kind.
pub struct RateLimiter {
    budget: u32,
    windows: Mutex<HashMap<CallKind, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(hourly_budget: u32) -> Self {
        Self {
            budget: hourly_budget,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one call of the given kind, or refuse if the hour is spent.
    pub fn acquire(&self, kind: CallKind) -> RemoteResult<()> {
        self.acquire_at(kind, Instant::now())
    }

    fn acquire_at(&self, kind: CallKind, now: Instant) -> RemoteResult<()> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = windows.entry(kind).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() as u64 >= u64::from(self.budget) {
            return Err(RemoteError::BudgetExhausted(kind.as_str()));
        }
        window.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_per_kind() {
        let limiter = RateLimiter::new(2);
        limiter.acquire(CallKind::UploadPart).unwrap();
        limiter.acquire(CallKind::UploadPart).unwrap();
        assert!(limiter.acquire(CallKind::UploadPart).is_err());
        // Other kinds keep their own budget.
        limiter.acquire(CallKind::ListFiles).unwrap();
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        limiter.acquire_at(CallKind::Authorize, start).unwrap();
        assert!(
            limiter
                .acquire_at(CallKind::Authorize, start + Duration::from_secs(1800))
                .is_err()
        );
        limiter
            .acquire_at(CallKind::Authorize, start + Duration::from_secs(3601))
            .unwrap();
    }
}
