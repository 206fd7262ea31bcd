//! File reference repository.

use crate::error::MetadataResult;
use crate::models::{FileReferenceRow, StoredFileRow, UsageBreakdown};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for the file/owner reference join.
#[async_trait]
pub trait ReferenceRepo: Send + Sync {
    /// Upsert a reference row, refreshing `referenced_at` when it exists.
    async fn upsert_ref(
        &self,
        file_id: i64,
        owner_id: i64,
        ref_kind: &str,
        referenced_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Upsert a durable reference and delete the owner's temporary
    /// reference for the same file in one transaction.
    async fn upsert_ref_drop_temporary(
        &self,
        file_id: i64,
        owner_id: i64,
        ref_kind: &str,
        referenced_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a reference row. Returns whether a row was removed.
    async fn delete_ref(&self, file_id: i64, owner_id: i64, ref_kind: &str)
    -> MetadataResult<bool>;

    /// All references to a file.
    async fn refs_for_file(&self, file_id: i64) -> MetadataResult<Vec<FileReferenceRow>>;

    /// Number of references to a file.
    async fn count_refs(&self, file_id: i64) -> MetadataResult<u64>;

    /// Whether the file has at least one non-temporary reference.
    async fn has_durable_ref(&self, file_id: i64) -> MetadataResult<bool>;

    /// Storage usage split by pool and scope; the quota source of truth.
    async fn usage(&self, owner_id: i64) -> MetadataResult<UsageBreakdown>;

    /// Delete temporary references older than `older_than`. Returns the
    /// number removed.
    async fn delete_expired_temporary(&self, older_than: OffsetDateTime) -> MetadataResult<u64>;

    /// Files eligible for emergency cleanup on behalf of `owner_id`: no
    /// remote identity, and every reference is a temporary reference held
    /// by this owner. Ordered oldest reference first.
    async fn emergency_candidates(
        &self,
        owner_id: i64,
        limit: u32,
    ) -> MetadataResult<Vec<StoredFileRow>>;
}
