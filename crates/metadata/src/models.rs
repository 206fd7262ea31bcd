//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Stored files
// =============================================================================

/// A content-addressed stored file.
///
/// `remote_file_id` and `remote_metadata` stay NULL until the upload queue
/// promotes the file to the remote store; they are written exactly once.
#[derive(Debug, Clone, FromRow)]
pub struct StoredFileRow {
    pub file_id: i64,
    /// 40-hex SHA-1 content hash; unique.
    pub checksum: String,
    /// Declared file name.
    pub name: String,
    pub size_bytes: i64,
    pub remote_file_id: Option<String>,
    /// Serialized download metadata returned by the vendor on upload.
    pub remote_metadata: Option<String>,
    /// Last successful local re-hash; lets the limbo sweep skip re-hashing
    /// recently verified files.
    pub last_verified_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl StoredFileRow {
    /// Whether the file has been promoted to the remote store.
    pub fn is_remote(&self) -> bool {
        self.remote_file_id.is_some()
    }
}

// =============================================================================
// File references
// =============================================================================

/// Join row between a stored file and an entity referencing it.
///
/// `ref_kind` is either a concrete identifier of the referencing entity or
/// the sentinel `temporary` (uploaded by `owner_id`, not yet attached to
/// anything durable). At most one row per (file_id, owner_id, ref_kind).
#[derive(Debug, Clone, FromRow)]
pub struct FileReferenceRow {
    pub file_id: i64,
    pub owner_id: i64,
    pub ref_kind: String,
    pub referenced_at: OffsetDateTime,
}

impl FileReferenceRow {
    pub fn is_temporary(&self) -> bool {
        self.ref_kind == stowage_core::TEMPORARY_REF
    }
}

/// Byte and file totals for one quota pool/scope combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub files: u64,
    pub bytes: u64,
}

/// Storage usage split by pool (local holding vs already remote) and scope
/// (requesting owner vs global). The quota source of truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageBreakdown {
    pub owner_local: UsageTotals,
    pub owner_remote: UsageTotals,
    pub global_local: UsageTotals,
    pub global_remote: UsageTotals,
}

// =============================================================================
// Chunked upload sessions
// =============================================================================

/// An in-progress multi-chunk upload, keyed by content checksum.
///
/// `chunk_files` is a JSON array of per-chunk staging filenames in chunk
/// order; an empty string marks a chunk not yet received. The row exists
/// only while the upload is incomplete.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkSessionRow {
    pub checksum: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub chunk_count: i64,
    pub chunk_files: String,
    pub touched_at: OffsetDateTime,
}

impl ChunkSessionRow {
    /// Decode the per-chunk filename slots.
    pub fn slots(&self) -> crate::MetadataResult<Vec<String>> {
        Ok(serde_json::from_str(&self.chunk_files)?)
    }

    /// Encode per-chunk filename slots.
    pub fn encode_slots(slots: &[String]) -> crate::MetadataResult<String> {
        Ok(serde_json::to_string(slots)?)
    }

    /// Indices of chunks not yet received, ascending.
    pub fn missing_indices(&self) -> crate::MetadataResult<Vec<u32>> {
        Ok(self
            .slots()?
            .iter()
            .enumerate()
            .filter(|(_, name)| name.is_empty())
            .map(|(i, _)| i as u32)
            .collect())
    }
}

// =============================================================================
// Reconciliation work queues
// =============================================================================

/// A remote object scheduled for deletion.
#[derive(Debug, Clone, FromRow)]
pub struct RemoteCleanupRow {
    pub entry_id: i64,
    pub remote_file_id: String,
    pub remote_name: String,
}

/// A database remote id not observed on the remote side, pending
/// investigation.
#[derive(Debug, Clone, FromRow)]
pub struct RemoteMissingRow {
    pub entry_id: i64,
    pub remote_file_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_slots_roundtrip() {
        let slots = vec!["a.part".to_string(), String::new(), "c.part".to_string()];
        let row = ChunkSessionRow {
            checksum: "c".repeat(40),
            total_size: 300,
            chunk_size: 100,
            chunk_count: 3,
            chunk_files: ChunkSessionRow::encode_slots(&slots).unwrap(),
            touched_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(row.slots().unwrap(), slots);
        assert_eq!(row.missing_indices().unwrap(), vec![1]);
    }

    #[test]
    fn test_reference_is_temporary() {
        let mut row = FileReferenceRow {
            file_id: 1,
            owner_id: 2,
            ref_kind: stowage_core::TEMPORARY_REF.to_string(),
            referenced_at: OffsetDateTime::now_utc(),
        };
        assert!(row.is_temporary());
        row.ref_kind = "post:77".to_string();
        assert!(!row.is_temporary());
    }
}
