//! Chunked upload session repository.

use crate::error::MetadataResult;
use crate::models::ChunkSessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for multi-chunk upload sessions.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create a session. Fails with `AlreadyExists` if one exists for the
    /// checksum.
    async fn create_session(&self, session: &ChunkSessionRow) -> MetadataResult<()>;

    /// Get the session for a checksum.
    async fn get_session(&self, checksum: &str) -> MetadataResult<Option<ChunkSessionRow>>;

    /// Record a received chunk filename in its slot and refresh
    /// `touched_at`, atomically with respect to other chunks of the same
    /// session. Returns the slots after the update.
    async fn record_session_slot(
        &self,
        checksum: &str,
        index: u32,
        chunk_name: &str,
        touched_at: OffsetDateTime,
    ) -> MetadataResult<Vec<String>>;

    /// Delete a session. Returns whether a row was removed.
    async fn delete_session(&self, checksum: &str) -> MetadataResult<bool>;

    /// Sessions untouched since `older_than`.
    async fn stale_sessions(&self, older_than: OffsetDateTime)
    -> MetadataResult<Vec<ChunkSessionRow>>;

    /// All sessions (for the staging directory sweep).
    async fn list_sessions(&self) -> MetadataResult<Vec<ChunkSessionRow>>;
}
