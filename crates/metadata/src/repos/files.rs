//! Stored file repository.

use crate::error::MetadataResult;
use crate::models::StoredFileRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for stored file operations.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Create a stored file record once local verification passed.
    /// Returns the surrogate key.
    async fn create_file(
        &self,
        checksum: &str,
        name: &str,
        size_bytes: i64,
        created_at: OffsetDateTime,
    ) -> MetadataResult<i64>;

    /// Look up a file by content checksum.
    async fn get_file_by_checksum(&self, checksum: &str) -> MetadataResult<Option<StoredFileRow>>;

    /// Look up a file by surrogate key.
    async fn get_file(&self, file_id: i64) -> MetadataResult<Option<StoredFileRow>>;

    /// Record the remote identity of an uploaded file. The update only
    /// applies while `remote_file_id` is still NULL, so the fields are
    /// written exactly once. Returns whether the update applied.
    async fn set_remote(
        &self,
        file_id: i64,
        remote_file_id: &str,
        remote_metadata: &str,
    ) -> MetadataResult<bool>;

    /// Clear the remote identity, demoting the file back to needs-upload.
    async fn clear_remote(&self, file_id: i64) -> MetadataResult<()>;

    /// Record a successful local re-hash.
    async fn mark_verified(&self, file_id: i64, verified_at: OffsetDateTime) -> MetadataResult<()>;

    /// Delete a file row and its references.
    async fn delete_file(&self, file_id: i64) -> MetadataResult<()>;

    /// Files with zero references, oldest first.
    async fn unreferenced_files(&self, limit: u32) -> MetadataResult<Vec<StoredFileRow>>;

    /// Files with no remote identity but at least one durable reference
    /// (stuck mid-pipeline).
    async fn limbo_files(&self, limit: u32) -> MetadataResult<Vec<StoredFileRow>>;

    /// All files that have a remote identity.
    async fn files_with_remote(&self) -> MetadataResult<Vec<StoredFileRow>>;

    /// Resolve a remote file id back to its row, if any.
    async fn get_file_by_remote_id(
        &self,
        remote_file_id: &str,
    ) -> MetadataResult<Option<StoredFileRow>>;
}
