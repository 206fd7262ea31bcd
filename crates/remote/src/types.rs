//! Wire types for the vendor API.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Result of an account authorization call, cached until near expiry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAuth {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    pub recommended_part_size: u64,
    pub absolute_minimum_part_size: u64,
    #[serde(default)]
    pub allowed: AllowedScope,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedScope {
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
}

/// Auth record plus the instant it was obtained.
#[derive(Debug, Clone)]
pub struct CachedAuth {
    pub auth: AccountAuth,
    pub bucket_id: String,
    pub obtained_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketList {
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub bucket_id: String,
    pub bucket_name: String,
}

/// A one-shot upload endpoint with its own short-lived token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub upload_url: String,
    pub authorization_token: String,
}

/// Handle for a multi-part upload in progress.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeFileHandle {
    pub file_id: String,
    pub file_name: String,
}

/// Confirmation of a single uploaded part.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUpload {
    pub part_number: u32,
    pub content_sha1: String,
}

/// Metadata the vendor keeps about a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileInfo {
    pub file_id: String,
    pub file_name: String,
    /// Zero for unfinished large files.
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub content_sha1: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNameList {
    pub files: Vec<RemoteFileInfo>,
    #[serde(default)]
    pub next_file_name: Option<String>,
}

/// Token authorizing downloads under a name prefix.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAuth {
    pub authorization_token: String,
}

/// Error body the vendor returns on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
