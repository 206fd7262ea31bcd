//! Reconciliation routines between staging disk, database, and remote store.
//!
//! Every routine is idempotent, independently scheduled through a
//! [`Routine`] state machine, and never overlaps with itself. Errors inside
//! a routine are logged and end that pass; the scheduling loop itself never
//! dies.

use crate::error::ApiResult;
use crate::holds::HoldSet;
use crate::queue::RemoteUploadQueue;
use crate::scheduler::Routine;
use crate::staging::StagingArea;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::GcConfig;
use stowage_metadata::MetadataStore;
use stowage_remote::{RemoteClient, RemoteError};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

const BATCH: u32 = 200;

pub struct GarbageCollector {
    config: GcConfig,
    metadata: Arc<dyn MetadataStore>,
    staging: Arc<StagingArea>,
    holds: Arc<HoldSet>,
    queue: Arc<RemoteUploadQueue>,
    remote: Arc<RemoteClient>,
}

impl GarbageCollector {
    pub fn new(
        config: GcConfig,
        metadata: Arc<dyn MetadataStore>,
        staging: Arc<StagingArea>,
        holds: Arc<HoldSet>,
        queue: Arc<RemoteUploadQueue>,
        remote: Arc<RemoteClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            metadata,
            staging,
            holds,
            queue,
            remote,
        })
    }

    /// Start the periodic drivers. Local (database/disk) routines run on the
    /// short period, routines that talk to the remote store on the long one.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let local = Duration::from_secs(self.config.period_secs);
        let remote = Duration::from_secs(self.config.remote_period_secs);
        vec![
            self.drive("expire_temporary_refs", local, |gc| async move {
                log_pass("expire_temporary_refs", gc.expire_temporary_refs().await);
            }),
            self.drive("collect_unreferenced", local, |gc| async move {
                log_pass("collect_unreferenced", gc.collect_unreferenced().await);
            }),
            self.drive("expire_chunk_sessions", local, |gc| async move {
                log_pass("expire_chunk_sessions", gc.expire_chunk_sessions().await);
            }),
            self.drive("sweep_staging", local, |gc| async move {
                log_pass("sweep_staging", gc.sweep_staging().await);
            }),
            self.drive("recover_limbo", local, |gc| async move {
                log_pass("recover_limbo", gc.recover_limbo().await);
            }),
            self.drive("cancel_unfinished_remote", remote, |gc| async move {
                log_pass("cancel_unfinished_remote", gc.cancel_unfinished_remote().await);
            }),
            self.drive("reconcile_remote_listing", remote, |gc| async move {
                log_pass("reconcile_remote_listing", gc.reconcile_remote_listing().await);
            }),
            self.drive("drain_cleanup_queue", remote, |gc| async move {
                log_pass("drain_cleanup_queue", gc.drain_cleanup_queue().await);
            }),
            self.drive("drain_missing_queue", remote, |gc| async move {
                log_pass("drain_missing_queue", gc.drain_missing_queue().await);
            }),
        ]
    }

    fn drive<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, run: F) -> JoinHandle<()>
    where
        F: Fn(Arc<GarbageCollector>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let gc = Arc::clone(self);
        let routine = Routine::new(name);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let gc = Arc::clone(&gc);
                let run = run.clone();
                routine.trigger(move || run(Arc::clone(&gc)));
            }
        })
    }

    /// Routine 1: drop temporary references past the lost-age threshold.
    pub async fn expire_temporary_refs(&self) -> ApiResult<()> {
        let cutoff = OffsetDateTime::now_utc() - self.config.lost_age();
        let removed = self.metadata.delete_expired_temporary(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "expired lost temporary references");
        }
        Ok(())
    }

    /// Routine 2: delete files nothing references any more, on disk and in
    /// the database; remote copies go to the cleanup queue.
    pub async fn collect_unreferenced(&self) -> ApiResult<()> {
        let batch = self.metadata.unreferenced_files(BATCH).await?;
        for file in batch {
            if self.holds.is_held(&file.checksum) {
                continue;
            }
            if let Some(remote_id) = &file.remote_file_id {
                self.metadata
                    .enqueue_cleanup(remote_id, &self.remote.remote_name(&file.checksum))
                    .await?;
            }
            self.staging.remove(&file.checksum).await?;
            self.metadata.delete_file(file.file_id).await?;
            tracing::info!(checksum = %file.checksum, "collected unreferenced file");
        }
        Ok(())
    }

    /// Routine 3: expire chunk sessions untouched past the lost-age
    /// threshold along with their partial chunk files.
    pub async fn expire_chunk_sessions(&self) -> ApiResult<()> {
        let cutoff = OffsetDateTime::now_utc() - self.config.lost_age();
        for session in self.metadata.stale_sessions(cutoff).await? {
            for name in session.slots()? {
                if !name.is_empty() {
                    self.staging.remove(&name).await?;
                }
            }
            self.metadata.delete_session(&session.checksum).await?;
            tracing::info!(checksum = %session.checksum, "expired stale chunk session");
        }
        Ok(())
    }

    /// Routine 4: remove staging files unknown to the database, once they
    /// outlive a short grace period.
    pub async fn sweep_staging(&self) -> ApiResult<()> {
        let mut session_files: HashSet<String> = HashSet::new();
        for session in self.metadata.list_sessions().await? {
            for name in session.slots()? {
                if !name.is_empty() {
                    session_files.insert(name);
                }
            }
        }

        let now = std::time::SystemTime::now();
        for (name, modified) in self.staging.scan().await? {
            if self.holds.is_held(&name) || session_files.contains(&name) {
                continue;
            }
            if self.metadata.get_file_by_checksum(&name).await?.is_some() {
                continue;
            }
            let age = now
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            if age < self.config.staging_grace() {
                continue;
            }
            self.staging.remove(&name).await?;
            tracing::info!(name, "removed unknown staging file");
        }
        Ok(())
    }

    /// Routine 5: cancel unfinished remote multi-part sessions nobody holds.
    pub async fn cancel_unfinished_remote(&self) -> ApiResult<()> {
        let unfinished = match self.remote.list_unfinished_large_files().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "could not list unfinished large files");
                return Ok(());
            }
        };
        for file in unfinished {
            if self.holds.is_held(&file.file_id) {
                continue;
            }
            match self.remote.cancel_large_file(&file.file_id).await {
                Ok(()) => {
                    tracing::info!(file_id = %file.file_id, "cancelled abandoned large file")
                }
                Err(e) => {
                    tracing::warn!(file_id = %file.file_id, error = %e, "cancel failed")
                }
            }
        }
        Ok(())
    }

    /// Routine 6: full remote listing. Unknown remote objects go to the
    /// cleanup queue; database remote ids the listing never showed go to the
    /// missing queue.
    pub async fn reconcile_remote_listing(&self) -> ApiResult<()> {
        let prefix = self.remote.remote_name("");
        let listing = match self.remote.list_all_files(&prefix).await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "remote listing failed");
                return Ok(());
            }
        };

        let mut seen: HashSet<String> = HashSet::with_capacity(listing.len());
        for object in &listing {
            seen.insert(object.file_id.clone());
            if self
                .metadata
                .get_file_by_remote_id(&object.file_id)
                .await?
                .is_none()
            {
                tracing::info!(file_id = %object.file_id, name = %object.file_name, "remote object unknown to database");
                self.metadata
                    .enqueue_cleanup(&object.file_id, &object.file_name)
                    .await?;
            }
        }

        for row in self.metadata.files_with_remote().await? {
            if let Some(remote_id) = &row.remote_file_id {
                if !seen.contains(remote_id) {
                    tracing::warn!(checksum = %row.checksum, remote_id, "remote object missing from listing");
                    self.metadata.enqueue_missing(remote_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Routine 7: drain the cleanup queue. Per-item failures are logged and
    /// the entry leaves the queue either way; a vendor 404 means the object
    /// is already gone.
    pub async fn drain_cleanup_queue(&self) -> ApiResult<()> {
        for entry in self.metadata.next_cleanup(BATCH).await? {
            if let Err(e) = self
                .remote
                .delete_file_version(&entry.remote_file_id, &entry.remote_name)
                .await
            {
                tracing::warn!(file_id = %entry.remote_file_id, error = %e, "remote cleanup delete failed");
            } else {
                tracing::info!(file_id = %entry.remote_file_id, "deleted orphaned remote object");
            }
            self.metadata.remove_cleanup(entry.entry_id).await?;
        }
        Ok(())
    }

    /// Routine 8: drain the missing queue. A confirmed 404 demotes the file
    /// back to needs-upload; any other error aborts the pass so it retries
    /// next period.
    pub async fn drain_missing_queue(&self) -> ApiResult<()> {
        for entry in self.metadata.next_missing(BATCH).await? {
            match self.remote.get_file_info(&entry.remote_file_id).await {
                Ok(_) => {
                    // Object exists after all; the listing was stale.
                    self.metadata.remove_missing(entry.entry_id).await?;
                }
                Err(RemoteError::Rejected { status: 404, .. }) => {
                    if let Some(row) = self
                        .metadata
                        .get_file_by_remote_id(&entry.remote_file_id)
                        .await?
                    {
                        tracing::warn!(checksum = %row.checksum, "remote object lost, demoting to local");
                        self.metadata.clear_remote(row.file_id).await?;
                    }
                    self.metadata.remove_missing(entry.entry_id).await?;
                }
                Err(e) => {
                    tracing::warn!(file_id = %entry.remote_file_id, error = %e, "missing probe failed, aborting pass");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Routine 9: re-enqueue limbo files (durable reference, no remote copy)
    /// whose staging bytes are intact. Recently verified files skip the
    /// re-hash.
    pub async fn recover_limbo(&self) -> ApiResult<()> {
        let now = OffsetDateTime::now_utc();
        for row in self.metadata.limbo_files(BATCH).await? {
            if self.holds.is_held(&row.checksum) {
                continue;
            }
            let recently_verified = row
                .last_verified_at
                .map(|t| now - t < self.config.verify_freshness())
                .unwrap_or(false);
            if recently_verified {
                if self.staging.file_size(&row.checksum).await?.is_none() {
                    tracing::error!(checksum = %row.checksum, "limbo file lost its staging bytes");
                    continue;
                }
            } else {
                match self.staging.rehash(&row.checksum).await? {
                    None => {
                        tracing::error!(checksum = %row.checksum, "limbo file lost its staging bytes");
                        continue;
                    }
                    Some(hash) if hash.to_hex() != row.checksum => {
                        tracing::error!(checksum = %row.checksum, "limbo file is corrupt on disk");
                        continue;
                    }
                    Some(_) => self.metadata.mark_verified(row.file_id, now).await?,
                }
            }
            self.queue.ensure_uploaded(&row.checksum);
        }
        Ok(())
    }

    /// Emergency variant of routine 2, run synchronously from quota
    /// enforcement. Only files referenced solely and temporarily by this
    /// owner qualify, oldest reference first, stopping once enough is
    /// reclaimed.
    pub async fn emergency_reclaim(
        &self,
        owner_id: i64,
        need_files: u64,
        need_bytes: u64,
    ) -> ApiResult<(u64, u64)> {
        let mut reclaimed_files = 0u64;
        let mut reclaimed_bytes = 0u64;
        for file in self.metadata.emergency_candidates(owner_id, BATCH).await? {
            if reclaimed_files >= need_files && reclaimed_bytes >= need_bytes {
                break;
            }
            if self.holds.is_held(&file.checksum) {
                continue;
            }
            self.staging.remove(&file.checksum).await?;
            self.metadata.delete_file(file.file_id).await?;
            reclaimed_files += 1;
            reclaimed_bytes += file.size_bytes as u64;
            tracing::info!(owner_id, checksum = %file.checksum, size = file.size_bytes, "emergency reclaim");
        }
        Ok((reclaimed_files, reclaimed_bytes))
    }
}

fn log_pass(name: &'static str, result: ApiResult<()>) {
    if let Err(e) = result {
        tracing::error!(routine = name, error = %e, "gc routine failed");
    }
}
