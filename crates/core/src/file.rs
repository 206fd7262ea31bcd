//! Stored file status and probe payloads.

use serde::{Deserialize, Serialize};

/// Observable state of a stored file, as reported by the status probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileStatus {
    /// Uploaded to the remote store.
    Ready,
    /// Locally held with a durable reference but no remote copy yet.
    Limbo,
    /// Queued or actively uploading to the remote store.
    Waiting,
    /// Last upload attempt failed; retried after cooldown.
    Error { message: String },
}

impl FileStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Response body of the status probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileStatusResponse {
    #[serde(flatten)]
    pub status: FileStatus,
    /// File size in bytes.
    pub size: u64,
    /// Declared file name.
    pub name: String,
    /// Creation timestamp (RFC 3339).
    pub created: String,
}

/// Response body of a completed upload: the opaque content-address token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadCompleteResponse {
    pub url: String,
}

/// Response body of an incomplete chunked upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkProgressResponse {
    /// Total number of chunks in the session.
    pub total: u32,
    /// Indices still missing, ascending.
    pub next: Vec<u32>,
    /// Per-chunk size for every chunk except the last.
    pub chunk: u64,
}

/// Reference-change notification consumed from the front layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceChangeRequest {
    pub owner_id: i64,
    pub ref_kind: String,
    /// Previous content-address token, if the owner referenced one before.
    pub old_token: Option<String>,
    /// New content-address token, if any.
    pub new_token: Option<String>,
}

/// Result of a reference change, persisted by the caller next to its record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceChangeResponse {
    /// Whether the file is still being migrated to the remote store.
    pub processing: bool,
    /// Last upload error, if the file is in the error state.
    pub error_msg: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_value(&FileStatus::Ready).unwrap();
        assert_eq!(json["status"], "ready");

        let json = serde_json::to_value(&FileStatus::Error {
            message: "remote 503".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "remote 503");
    }

    #[test]
    fn test_probe_response_flattens_status() {
        let resp = FileStatusResponse {
            status: FileStatus::Waiting,
            size: 42,
            name: "mod.zip".to_string(),
            created: "2026-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["size"], 42);
    }
}
