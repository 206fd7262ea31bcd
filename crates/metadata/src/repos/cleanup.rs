//! Remote reconciliation work queues.

use crate::error::MetadataResult;
use crate::models::{RemoteCleanupRow, RemoteMissingRow};
use async_trait::async_trait;

/// Repository for the remote-cleanup and remote-missing FIFO queues.
/// Entries are idempotently re-addable; enqueueing an id already present
/// is a no-op.
#[async_trait]
pub trait CleanupRepo: Send + Sync {
    /// Schedule a remote object for deletion.
    async fn enqueue_cleanup(&self, remote_file_id: &str, remote_name: &str)
    -> MetadataResult<()>;

    /// Oldest cleanup entries, FIFO.
    async fn next_cleanup(&self, limit: u32) -> MetadataResult<Vec<RemoteCleanupRow>>;

    /// Remove a consumed cleanup entry.
    async fn remove_cleanup(&self, entry_id: i64) -> MetadataResult<()>;

    /// Schedule a remote id for missing-object investigation.
    async fn enqueue_missing(&self, remote_file_id: &str) -> MetadataResult<()>;

    /// Oldest missing entries, FIFO.
    async fn next_missing(&self, limit: u32) -> MetadataResult<Vec<RemoteMissingRow>>;

    /// Remove a consumed missing entry.
    async fn remove_missing(&self, entry_id: i64) -> MetadataResult<()>;
}
