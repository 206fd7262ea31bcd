//! Client for the remote archive storage vendor.
//!
//! Wraps the vendor's HTTP API with cached account authorization, retry
//! classification, and a client-side hourly call budget.

pub mod client;
pub mod error;
pub mod limiter;
pub mod retry;
pub mod types;

pub use client::RemoteClient;
pub use error::{RemoteError, RemoteResult};
pub use types::{
    AccountAuth, DownloadAuth, LargeFileHandle, PartUpload, RemoteFileInfo, UploadTarget,
};
