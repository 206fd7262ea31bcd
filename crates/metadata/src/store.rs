//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    ChunkSessionRow, FileReferenceRow, RemoteCleanupRow, RemoteMissingRow, StoredFileRow,
    UsageBreakdown, UsageTotals,
};
use crate::repos::{CleanupRepo, FileRepo, ReferenceRepo, SessionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use stowage_core::TEMPORARY_REF;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    FileRepo + ReferenceRepo + SessionRepo + CleanupRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under load.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stored_files (
                file_id INTEGER PRIMARY KEY AUTOINCREMENT,
                checksum TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                remote_file_id TEXT,
                remote_metadata TEXT,
                last_verified_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_references (
                file_id INTEGER NOT NULL REFERENCES stored_files(file_id) ON DELETE CASCADE,
                owner_id INTEGER NOT NULL,
                ref_kind TEXT NOT NULL,
                referenced_at TEXT NOT NULL,
                PRIMARY KEY (file_id, owner_id, ref_kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_references_owner
             ON file_references (owner_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_sessions (
                checksum TEXT PRIMARY KEY,
                total_size INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                chunk_files TEXT NOT NULL,
                touched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remote_cleanup (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_file_id TEXT NOT NULL UNIQUE,
                remote_name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remote_missing (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_file_id TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for SqliteStore {
    async fn create_file(
        &self,
        checksum: &str,
        name: &str,
        size_bytes: i64,
        created_at: OffsetDateTime,
    ) -> MetadataResult<i64> {
        let result = sqlx::query(
            "INSERT INTO stored_files (checksum, name, size_bytes, last_verified_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(checksum)
        .bind(name)
        .bind(size_bytes)
        .bind(created_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                MetadataError::AlreadyExists(format!("stored file {checksum}"))
            }
            _ => MetadataError::Database(e),
        })?;
        Ok(result.last_insert_rowid())
    }

    async fn get_file_by_checksum(&self, checksum: &str) -> MetadataResult<Option<StoredFileRow>> {
        let row = sqlx::query_as::<_, StoredFileRow>(
            "SELECT * FROM stored_files WHERE checksum = ?",
        )
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_file(&self, file_id: i64) -> MetadataResult<Option<StoredFileRow>> {
        let row =
            sqlx::query_as::<_, StoredFileRow>("SELECT * FROM stored_files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn set_remote(
        &self,
        file_id: i64,
        remote_file_id: &str,
        remote_metadata: &str,
    ) -> MetadataResult<bool> {
        // remote_file_id IS NULL keeps the write once-only.
        let result = sqlx::query(
            "UPDATE stored_files
             SET remote_file_id = ?, remote_metadata = ?
             WHERE file_id = ? AND remote_file_id IS NULL",
        )
        .bind(remote_file_id)
        .bind(remote_metadata)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_remote(&self, file_id: i64) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE stored_files
             SET remote_file_id = NULL, remote_metadata = NULL
             WHERE file_id = ?",
        )
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_verified(&self, file_id: i64, verified_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE stored_files SET last_verified_at = ? WHERE file_id = ?")
            .bind(verified_at)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_file(&self, file_id: i64) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_references WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stored_files WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn unreferenced_files(&self, limit: u32) -> MetadataResult<Vec<StoredFileRow>> {
        let rows = sqlx::query_as::<_, StoredFileRow>(
            "SELECT f.* FROM stored_files f
             WHERE NOT EXISTS (
                 SELECT 1 FROM file_references r WHERE r.file_id = f.file_id
             )
             ORDER BY f.created_at ASC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn limbo_files(&self, limit: u32) -> MetadataResult<Vec<StoredFileRow>> {
        let rows = sqlx::query_as::<_, StoredFileRow>(
            "SELECT f.* FROM stored_files f
             WHERE f.remote_file_id IS NULL
               AND EXISTS (
                   SELECT 1 FROM file_references r
                   WHERE r.file_id = f.file_id AND r.ref_kind != ?
               )
             ORDER BY f.created_at ASC
             LIMIT ?",
        )
        .bind(TEMPORARY_REF)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn files_with_remote(&self) -> MetadataResult<Vec<StoredFileRow>> {
        let rows = sqlx::query_as::<_, StoredFileRow>(
            "SELECT * FROM stored_files WHERE remote_file_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_file_by_remote_id(
        &self,
        remote_file_id: &str,
    ) -> MetadataResult<Option<StoredFileRow>> {
        let row = sqlx::query_as::<_, StoredFileRow>(
            "SELECT * FROM stored_files WHERE remote_file_id = ?",
        )
        .bind(remote_file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

impl SqliteStore {
    async fn usage_query(
        &self,
        owner_id: Option<i64>,
        remote: bool,
    ) -> MetadataResult<UsageTotals> {
        let remote_clause = if remote {
            "remote_file_id IS NOT NULL"
        } else {
            "remote_file_id IS NULL"
        };
        let (files, bytes): (i64, i64) = match owner_id {
            Some(owner_id) => {
                sqlx::query_as(&format!(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM stored_files
                     WHERE {remote_clause} AND file_id IN (
                         SELECT DISTINCT file_id FROM file_references WHERE owner_id = ?
                     )"
                ))
                .bind(owner_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM stored_files
                     WHERE {remote_clause}"
                ))
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(UsageTotals {
            files: files as u64,
            bytes: bytes as u64,
        })
    }
}

#[async_trait]
impl ReferenceRepo for SqliteStore {
    async fn upsert_ref(
        &self,
        file_id: i64,
        owner_id: i64,
        ref_kind: &str,
        referenced_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO file_references (file_id, owner_id, ref_kind, referenced_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (file_id, owner_id, ref_kind)
             DO UPDATE SET referenced_at = excluded.referenced_at",
        )
        .bind(file_id)
        .bind(owner_id)
        .bind(ref_kind)
        .bind(referenced_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_ref_drop_temporary(
        &self,
        file_id: i64,
        owner_id: i64,
        ref_kind: &str,
        referenced_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO file_references (file_id, owner_id, ref_kind, referenced_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (file_id, owner_id, ref_kind)
             DO UPDATE SET referenced_at = excluded.referenced_at",
        )
        .bind(file_id)
        .bind(owner_id)
        .bind(ref_kind)
        .bind(referenced_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM file_references
             WHERE file_id = ? AND owner_id = ? AND ref_kind = ?",
        )
        .bind(file_id)
        .bind(owner_id)
        .bind(TEMPORARY_REF)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_ref(
        &self,
        file_id: i64,
        owner_id: i64,
        ref_kind: &str,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "DELETE FROM file_references
             WHERE file_id = ? AND owner_id = ? AND ref_kind = ?",
        )
        .bind(file_id)
        .bind(owner_id)
        .bind(ref_kind)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn refs_for_file(&self, file_id: i64) -> MetadataResult<Vec<FileReferenceRow>> {
        let rows = sqlx::query_as::<_, FileReferenceRow>(
            "SELECT * FROM file_references WHERE file_id = ? ORDER BY referenced_at ASC",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_refs(&self, file_id: i64) -> MetadataResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM file_references WHERE file_id = ?")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn has_durable_ref(&self, file_id: i64) -> MetadataResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_references WHERE file_id = ? AND ref_kind != ?",
        )
        .bind(file_id)
        .bind(TEMPORARY_REF)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn usage(&self, owner_id: i64) -> MetadataResult<UsageBreakdown> {
        Ok(UsageBreakdown {
            owner_local: self.usage_query(Some(owner_id), false).await?,
            owner_remote: self.usage_query(Some(owner_id), true).await?,
            global_local: self.usage_query(None, false).await?,
            global_remote: self.usage_query(None, true).await?,
        })
    }

    async fn delete_expired_temporary(&self, older_than: OffsetDateTime) -> MetadataResult<u64> {
        let result = sqlx::query(
            "DELETE FROM file_references WHERE ref_kind = ? AND referenced_at < ?",
        )
        .bind(TEMPORARY_REF)
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn emergency_candidates(
        &self,
        owner_id: i64,
        limit: u32,
    ) -> MetadataResult<Vec<StoredFileRow>> {
        let rows = sqlx::query_as::<_, StoredFileRow>(
            "SELECT f.* FROM stored_files f
             WHERE f.remote_file_id IS NULL
               AND EXISTS (
                   SELECT 1 FROM file_references r
                   WHERE r.file_id = f.file_id AND r.owner_id = ?1 AND r.ref_kind = ?2
               )
               AND NOT EXISTS (
                   SELECT 1 FROM file_references r
                   WHERE r.file_id = f.file_id
                     AND NOT (r.owner_id = ?1 AND r.ref_kind = ?2)
               )
             ORDER BY (
                 SELECT MIN(referenced_at) FROM file_references r WHERE r.file_id = f.file_id
             ) ASC
             LIMIT ?3",
        )
        .bind(owner_id)
        .bind(TEMPORARY_REF)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SessionRepo for SqliteStore {
    async fn create_session(&self, session: &ChunkSessionRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO chunk_sessions
             (checksum, total_size, chunk_size, chunk_count, chunk_files, touched_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.checksum)
        .bind(session.total_size)
        .bind(session.chunk_size)
        .bind(session.chunk_count)
        .bind(&session.chunk_files)
        .bind(session.touched_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                MetadataError::AlreadyExists(format!("chunk session {}", session.checksum))
            }
            _ => MetadataError::Database(e),
        })?;
        Ok(())
    }

    async fn get_session(&self, checksum: &str) -> MetadataResult<Option<ChunkSessionRow>> {
        let row = sqlx::query_as::<_, ChunkSessionRow>(
            "SELECT * FROM chunk_sessions WHERE checksum = ?",
        )
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_session_slot(
        &self,
        checksum: &str,
        index: u32,
        chunk_name: &str,
        touched_at: OffsetDateTime,
    ) -> MetadataResult<Vec<String>> {
        // Read-modify-write in one transaction so two chunks of the same
        // session cannot erase each other's slot.
        let mut tx = self.pool.begin().await?;
        let session = sqlx::query_as::<_, ChunkSessionRow>(
            "SELECT * FROM chunk_sessions WHERE checksum = ?",
        )
        .bind(checksum)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| MetadataError::NotFound(format!("chunk session {checksum}")))?;

        let mut slots = session.slots()?;
        let slot = slots.get_mut(index as usize).ok_or_else(|| {
            MetadataError::NotFound(format!("chunk slot {index} of session {checksum}"))
        })?;
        *slot = chunk_name.to_string();

        sqlx::query(
            "UPDATE chunk_sessions SET chunk_files = ?, touched_at = ? WHERE checksum = ?",
        )
        .bind(ChunkSessionRow::encode_slots(&slots)?)
        .bind(touched_at)
        .bind(checksum)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(slots)
    }

    async fn delete_session(&self, checksum: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM chunk_sessions WHERE checksum = ?")
            .bind(checksum)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stale_sessions(
        &self,
        older_than: OffsetDateTime,
    ) -> MetadataResult<Vec<ChunkSessionRow>> {
        let rows = sqlx::query_as::<_, ChunkSessionRow>(
            "SELECT * FROM chunk_sessions WHERE touched_at < ?",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_sessions(&self) -> MetadataResult<Vec<ChunkSessionRow>> {
        let rows = sqlx::query_as::<_, ChunkSessionRow>("SELECT * FROM chunk_sessions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl CleanupRepo for SqliteStore {
    async fn enqueue_cleanup(
        &self,
        remote_file_id: &str,
        remote_name: &str,
    ) -> MetadataResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO remote_cleanup (remote_file_id, remote_name) VALUES (?, ?)",
        )
        .bind(remote_file_id)
        .bind(remote_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn next_cleanup(&self, limit: u32) -> MetadataResult<Vec<RemoteCleanupRow>> {
        let rows = sqlx::query_as::<_, RemoteCleanupRow>(
            "SELECT * FROM remote_cleanup ORDER BY entry_id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn remove_cleanup(&self, entry_id: i64) -> MetadataResult<()> {
        sqlx::query("DELETE FROM remote_cleanup WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enqueue_missing(&self, remote_file_id: &str) -> MetadataResult<()> {
        sqlx::query("INSERT OR IGNORE INTO remote_missing (remote_file_id) VALUES (?)")
            .bind(remote_file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn next_missing(&self, limit: u32) -> MetadataResult<Vec<RemoteMissingRow>> {
        let rows = sqlx::query_as::<_, RemoteMissingRow>(
            "SELECT * FROM remote_missing ORDER BY entry_id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn remove_missing(&self, entry_id: i64) -> MetadataResult<()> {
        sqlx::query("DELETE FROM remote_missing WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let temp = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).await.unwrap();
        (temp, store)
    }

    fn checksum(label: u8) -> String {
        format!("{:02x}", label).repeat(20)
    }

    #[tokio::test]
    async fn test_create_file_rejects_duplicate_checksum() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        store
            .create_file(&checksum(1), "a.zip", 100, now)
            .await
            .unwrap();
        let err = store
            .create_file(&checksum(1), "b.zip", 100, now)
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_set_remote_is_once_only() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let id = store
            .create_file(&checksum(2), "a.zip", 100, now)
            .await
            .unwrap();

        assert!(store.set_remote(id, "rf-1", "{}").await.unwrap());
        assert!(!store.set_remote(id, "rf-2", "{}").await.unwrap());

        let row = store.get_file(id).await.unwrap().unwrap();
        assert_eq!(row.remote_file_id.as_deref(), Some("rf-1"));

        store.clear_remote(id).await.unwrap();
        let row = store.get_file(id).await.unwrap().unwrap();
        assert!(row.remote_file_id.is_none());
        // Cleared fields may be written again.
        assert!(store.set_remote(id, "rf-3", "{}").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_ref_refreshes_timestamp() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let id = store
            .create_file(&checksum(3), "a.zip", 100, now)
            .await
            .unwrap();

        store.upsert_ref(id, 7, "post:1", now).await.unwrap();
        let later = now + time::Duration::minutes(5);
        store.upsert_ref(id, 7, "post:1", later).await.unwrap();

        let refs = store.refs_for_file(id).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].referenced_at, later);
    }

    #[tokio::test]
    async fn test_durable_ref_drops_temporary() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let id = store
            .create_file(&checksum(4), "a.zip", 100, now)
            .await
            .unwrap();

        store.upsert_ref(id, 7, TEMPORARY_REF, now).await.unwrap();
        assert!(!store.has_durable_ref(id).await.unwrap());

        store
            .upsert_ref_drop_temporary(id, 7, "post:1", now)
            .await
            .unwrap();
        let refs = store.refs_for_file(id).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].ref_kind, "post:1");
        assert!(store.has_durable_ref(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreferenced_and_limbo_queries() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();

        let orphan = store
            .create_file(&checksum(5), "orphan.zip", 10, now)
            .await
            .unwrap();
        let limbo = store
            .create_file(&checksum(6), "limbo.zip", 20, now)
            .await
            .unwrap();
        store.upsert_ref(limbo, 1, "post:9", now).await.unwrap();

        let unref: Vec<i64> = store
            .unreferenced_files(10)
            .await
            .unwrap()
            .iter()
            .map(|f| f.file_id)
            .collect();
        assert_eq!(unref, vec![orphan]);

        let limbos: Vec<i64> = store
            .limbo_files(10)
            .await
            .unwrap()
            .iter()
            .map(|f| f.file_id)
            .collect();
        assert_eq!(limbos, vec![limbo]);

        // Promoting the limbo file to remote removes it from the limbo set.
        store.set_remote(limbo, "rf", "{}").await.unwrap();
        assert!(store.limbo_files(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_usage_breakdown() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();

        let mine_local = store
            .create_file(&checksum(7), "a.zip", 100, now)
            .await
            .unwrap();
        let mine_remote = store
            .create_file(&checksum(8), "b.zip", 200, now)
            .await
            .unwrap();
        let other = store
            .create_file(&checksum(9), "c.zip", 400, now)
            .await
            .unwrap();

        store
            .upsert_ref(mine_local, 7, TEMPORARY_REF, now)
            .await
            .unwrap();
        store.upsert_ref(mine_remote, 7, "post:1", now).await.unwrap();
        store.upsert_ref(other, 8, "post:2", now).await.unwrap();
        store.set_remote(mine_remote, "rf", "{}").await.unwrap();

        let usage = store.usage(7).await.unwrap();
        assert_eq!(usage.owner_local, UsageTotals { files: 1, bytes: 100 });
        assert_eq!(usage.owner_remote, UsageTotals { files: 1, bytes: 200 });
        assert_eq!(usage.global_local, UsageTotals { files: 2, bytes: 500 });
        assert_eq!(usage.global_remote, UsageTotals { files: 1, bytes: 200 });
    }

    #[tokio::test]
    async fn test_delete_expired_temporary() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let old = now - time::Duration::days(10);

        let a = store
            .create_file(&checksum(10), "a.zip", 1, now)
            .await
            .unwrap();
        let b = store
            .create_file(&checksum(11), "b.zip", 1, now)
            .await
            .unwrap();
        store.upsert_ref(a, 1, TEMPORARY_REF, old).await.unwrap();
        store.upsert_ref(b, 1, TEMPORARY_REF, now).await.unwrap();
        // Durable refs are never expired.
        store.upsert_ref(a, 2, "post:1", old).await.unwrap();

        let removed = store
            .delete_expired_temporary(now - time::Duration::days(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_refs(a).await.unwrap(), 1);
        assert_eq!(store.count_refs(b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_emergency_candidates_scope_and_order() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();

        // Oldest purely-temporary file of owner 7.
        let oldest = store
            .create_file(&checksum(12), "old.zip", 1, now)
            .await
            .unwrap();
        store
            .upsert_ref(oldest, 7, TEMPORARY_REF, now - time::Duration::hours(3))
            .await
            .unwrap();

        let newer = store
            .create_file(&checksum(13), "new.zip", 1, now)
            .await
            .unwrap();
        store
            .upsert_ref(newer, 7, TEMPORARY_REF, now - time::Duration::hours(1))
            .await
            .unwrap();

        // Has a durable ref: never an emergency candidate.
        let durable = store
            .create_file(&checksum(14), "durable.zip", 1, now)
            .await
            .unwrap();
        store
            .upsert_ref(durable, 7, TEMPORARY_REF, now - time::Duration::hours(9))
            .await
            .unwrap();
        store.upsert_ref(durable, 7, "post:1", now).await.unwrap();

        // Referenced by someone else too: excluded.
        let shared = store
            .create_file(&checksum(15), "shared.zip", 1, now)
            .await
            .unwrap();
        store
            .upsert_ref(shared, 7, TEMPORARY_REF, now - time::Duration::hours(9))
            .await
            .unwrap();
        store.upsert_ref(shared, 8, TEMPORARY_REF, now).await.unwrap();

        let ids: Vec<i64> = store
            .emergency_candidates(7, 10)
            .await
            .unwrap()
            .iter()
            .map(|f| f.file_id)
            .collect();
        assert_eq!(ids, vec![oldest, newer]);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let slots = vec![String::new(), String::new()];
        let session = ChunkSessionRow {
            checksum: checksum(16),
            total_size: 200,
            chunk_size: 100,
            chunk_count: 2,
            chunk_files: ChunkSessionRow::encode_slots(&slots).unwrap(),
            touched_at: now,
        };

        store.create_session(&session).await.unwrap();
        assert!(matches!(
            store.create_session(&session).await.unwrap_err(),
            MetadataError::AlreadyExists(_)
        ));

        let slots = store
            .record_session_slot(&session.checksum, 0, "c0.part", now)
            .await
            .unwrap();
        assert_eq!(slots, vec!["c0.part".to_string(), String::new()]);

        let row = store.get_session(&session.checksum).await.unwrap().unwrap();
        assert_eq!(row.missing_indices().unwrap(), vec![1]);

        assert!(store.delete_session(&session.checksum).await.unwrap());
        assert!(!store.delete_session(&session.checksum).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_session_slot_keeps_concurrent_writes() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let session = ChunkSessionRow {
            checksum: checksum(18),
            total_size: 300,
            chunk_size: 100,
            chunk_count: 3,
            chunk_files: "[\"\",\"\",\"\"]".to_string(),
            touched_at: now,
        };
        store.create_session(&session).await.unwrap();

        let (a, b) = tokio::join!(
            store.record_session_slot(&session.checksum, 0, "c0.part", now),
            store.record_session_slot(&session.checksum, 1, "c1.part", now),
        );
        // Neither write may clobber the other's slot.
        a.unwrap();
        b.unwrap();

        let row = store.get_session(&session.checksum).await.unwrap().unwrap();
        assert_eq!(row.missing_indices().unwrap(), vec![2]);

        let err = store
            .record_session_slot(&session.checksum, 9, "c9.part", now)
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_sessions() {
        let (_temp, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let session = ChunkSessionRow {
            checksum: checksum(17),
            total_size: 200,
            chunk_size: 100,
            chunk_count: 2,
            chunk_files: "[\"\",\"\"]".to_string(),
            touched_at: now - time::Duration::days(7),
        };
        store.create_session(&session).await.unwrap();

        let stale = store
            .stale_sessions(now - time::Duration::days(5))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert!(
            store
                .stale_sessions(now - time::Duration::days(9))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_cleanup_queues_are_idempotent_fifo() {
        let (_temp, store) = open_store().await;

        store.enqueue_cleanup("rf-1", "files/a").await.unwrap();
        store.enqueue_cleanup("rf-2", "files/b").await.unwrap();
        store.enqueue_cleanup("rf-1", "files/a").await.unwrap();

        let entries = store.next_cleanup(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].remote_file_id, "rf-1");

        store.remove_cleanup(entries[0].entry_id).await.unwrap();
        let entries = store.next_cleanup(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].remote_file_id, "rf-2");

        store.enqueue_missing("rf-9").await.unwrap();
        store.enqueue_missing("rf-9").await.unwrap();
        let missing = store.next_missing(10).await.unwrap();
        assert_eq!(missing.len(), 1);
        store.remove_missing(missing[0].entry_id).await.unwrap();
        assert!(store.next_missing(10).await.unwrap().is_empty());
    }
}
