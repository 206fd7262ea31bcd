//! Bounded-concurrency queue migrating staged files to the remote store.
//!
//! One state machine per checksum: absent, waiting (admitted but over the
//! concurrency cap), uploading (with a sub-phase string), or errored with a
//! cooldown timestamp. At most one upload per checksum is ever active, and
//! duplicate enqueues are no-ops.

use crate::holds::HoldSet;
use crate::notify::FileEventSink;
use crate::staging::StagingArea;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use stowage_core::config::QueueConfig;
use stowage_metadata::{MetadataStore, StoredFileRow};
use stowage_remote::{RemoteClient, RemoteFileInfo};
use time::OffsetDateTime;

const PHASE_INITIALIZING: &str = "initializing";
const PHASE_CONNECTING: &str = "connecting";
const PHASE_PREPARING: &str = "preparing";
const PHASE_UPLOADING: &str = "uploading";
const PHASE_FINALIZING: &str = "finalizing";
const PHASE_READY: &str = "ready";

/// Where a checksum currently sits in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePosition {
    Waiting,
    Uploading { phase: &'static str },
    Errored { message: String },
}

#[derive(Default)]
struct QueueInner {
    active: HashMap<String, &'static str>,
    waiting: VecDeque<String>,
    errored: HashMap<String, (String, OffsetDateTime)>,
}

pub struct RemoteUploadQueue {
    config: QueueConfig,
    metadata: Arc<dyn MetadataStore>,
    remote: Arc<RemoteClient>,
    staging: Arc<StagingArea>,
    holds: Arc<HoldSet>,
    sink: Arc<dyn FileEventSink>,
    inner: Mutex<QueueInner>,
}

impl RemoteUploadQueue {
    pub fn new(
        config: QueueConfig,
        metadata: Arc<dyn MetadataStore>,
        remote: Arc<RemoteClient>,
        staging: Arc<StagingArea>,
        holds: Arc<HoldSet>,
        sink: Arc<dyn FileEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            metadata,
            remote,
            staging,
            holds,
            sink,
            inner: Mutex::new(QueueInner::default()),
        })
    }

    /// Make sure this checksum ends up on the remote store.
    ///
    /// No-op while the checksum is already waiting, uploading, or cooling
    /// down after an error.
    pub fn ensure_uploaded(self: &Arc<Self>, checksum: &str) {
        let start = {
            let mut inner = self.lock();
            if inner.active.contains_key(checksum)
                || inner.waiting.iter().any(|c| c == checksum)
            {
                return;
            }
            if let Some((_, errored_at)) = inner.errored.get(checksum) {
                let elapsed = OffsetDateTime::now_utc() - *errored_at;
                if elapsed < self.config.error_cooldown() {
                    return;
                }
                inner.errored.remove(checksum);
            }
            if inner.active.len() as u32 >= self.config.max_active {
                tracing::debug!(checksum, "upload parked, concurrency cap reached");
                inner.waiting.push_back(checksum.to_string());
                false
            } else {
                inner
                    .active
                    .insert(checksum.to_string(), PHASE_INITIALIZING);
                true
            }
        };
        if start {
            self.spawn_worker(checksum.to_string());
        }
    }

    pub fn position_of(&self, checksum: &str) -> Option<QueuePosition> {
        let inner = self.lock();
        if let Some(phase) = inner.active.get(checksum) {
            return Some(QueuePosition::Uploading { phase });
        }
        if inner.waiting.iter().any(|c| c == checksum) {
            return Some(QueuePosition::Waiting);
        }
        inner
            .errored
            .get(checksum)
            .map(|(message, _)| QueuePosition::Errored {
                message: message.clone(),
            })
    }

    pub fn error_of(&self, checksum: &str) -> Option<String> {
        self.lock().errored.get(checksum).map(|(m, _)| m.clone())
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, checksum: &str, phase: &'static str) {
        if let Some(slot) = self.lock().active.get_mut(checksum) {
            *slot = phase;
        }
    }

    fn spawn_worker(self: &Arc<Self>, checksum: String) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut current = checksum;
            // A finished upload hands its slot to one waiting checksum, so
            // this worker keeps going until the waiting set is drained.
            while let Some(next) = queue.run_one(current).await {
                current = next;
            }
        });
    }

    /// Run one upload to completion, record the outcome, and claim the next
    /// waiting checksum if any.
    async fn run_one(self: &Arc<Self>, checksum: String) -> Option<String> {
        let result = self.perform(&checksum).await;

        let next = {
            let mut inner = self.lock();
            inner.active.remove(&checksum);
            if let Err(message) = &result {
                inner
                    .errored
                    .insert(checksum.clone(), (message.clone(), OffsetDateTime::now_utc()));
            }
            if (inner.active.len() as u32) < self.config.max_active {
                let next = inner.waiting.pop_front();
                if let Some(next) = &next {
                    inner.active.insert(next.clone(), PHASE_INITIALIZING);
                }
                next
            } else {
                None
            }
        };

        match result {
            Ok(true) => self.sink.file_ready(&checksum).await,
            Ok(false) => {}
            Err(message) => {
                tracing::warn!(checksum, error = %message, "remote upload failed");
                self.sink.file_failed(&checksum, &message).await;
            }
        }
        next
    }

    /// The upload itself. `Ok(false)` means there was nothing to do.
    async fn perform(&self, checksum: &str) -> Result<bool, String> {
        let Some(file) = self
            .metadata
            .get_file_by_checksum(checksum)
            .await
            .map_err(display)?
        else {
            tracing::debug!(checksum, "queued file no longer exists, skipping");
            return Ok(false);
        };
        if file.remote_file_id.is_some() {
            return Ok(false);
        }

        // Keeps GC away from the staging file for the whole transfer.
        let _hold = self.holds.acquire(checksum).map_err(display)?;

        self.set_phase(checksum, PHASE_CONNECTING);
        let mut part_size = self.remote.recommended_part_size().await.map_err(display)?;
        if part_size == 0 {
            part_size = self.config.fallback_part_size;
        }

        self.set_phase(checksum, PHASE_PREPARING);
        let size = file.size_bytes as u64;
        let remote_name = self.remote.remote_name(checksum);

        let info = if size < part_size.saturating_mul(2) {
            self.upload_single_shot(&file, &remote_name).await?
        } else {
            self.upload_multi_part(&file, &remote_name, part_size).await?
        };

        self.set_phase(checksum, PHASE_FINALIZING);
        let confirmed = self.remote.get_file_info(&info.file_id).await.map_err(display)?;
        if confirmed.content_length != size {
            // Orphan the bad object rather than trust it.
            let _ = self
                .metadata
                .enqueue_cleanup(&info.file_id, &info.file_name)
                .await;
            return Err(format!(
                "uploaded size mismatch: local {size}, remote {}",
                confirmed.content_length
            ));
        }

        let remote_metadata = serde_json::to_string(&confirmed).map_err(display)?;
        let stored = self
            .metadata
            .set_remote(file.file_id, &confirmed.file_id, &remote_metadata)
            .await
            .map_err(display)?;
        if !stored {
            // Another path won the exactly-once write; our object is surplus.
            let _ = self
                .metadata
                .enqueue_cleanup(&confirmed.file_id, &confirmed.file_name)
                .await;
            return Ok(true);
        }

        self.set_phase(checksum, PHASE_READY);
        if let Err(e) = self.staging.remove(checksum).await {
            tracing::warn!(checksum, error = %e, "staging file removal failed after upload");
        }
        tracing::info!(checksum, remote_file_id = %confirmed.file_id, size, "file migrated to remote store");
        Ok(true)
    }

    async fn upload_single_shot(
        &self,
        file: &StoredFileRow,
        remote_name: &str,
    ) -> Result<RemoteFileInfo, String> {
        self.set_phase(&file.checksum, PHASE_UPLOADING);
        let data = self.staging.read_all(&file.checksum).await.map_err(display)?;
        let disposition = format!("attachment; filename=\"{}\"", file.name.replace('"', ""));
        self.remote
            .upload_file(
                remote_name,
                &[("b2-content-disposition", disposition)],
                data,
            )
            .await
            .map_err(display)
    }

    async fn upload_multi_part(
        &self,
        file: &StoredFileRow,
        remote_name: &str,
        part_size: u64,
    ) -> Result<RemoteFileInfo, String> {
        let checksum = &file.checksum;
        let size = file.size_bytes as u64;
        let piece_count = size.div_ceil(part_size);

        let handle = self.remote.start_large_file(remote_name).await.map_err(display)?;
        // Held from the instant the id is known, so the unfinished-session
        // GC routine cannot cancel it under us.
        let _large_hold = self.holds.acquire(&handle.file_id).map_err(display)?;
        tracing::debug!(checksum, large_file_id = %handle.file_id, piece_count, "multi-part upload started");

        self.set_phase(checksum, PHASE_UPLOADING);
        let result: Result<RemoteFileInfo, String> = async {
            let mut piece_hashes = Vec::with_capacity(piece_count as usize);
            for piece in 0..piece_count {
                let offset = piece * part_size;
                let len = part_size.min(size - offset);
                let data = self
                    .staging
                    .read_range(checksum, offset, len)
                    .await
                    .map_err(display)?;
                let sha1 = self
                    .remote
                    .upload_part(&handle.file_id, (piece + 1) as u32, data)
                    .await
                    .map_err(display)?;
                piece_hashes.push(sha1);
            }
            self.set_phase(checksum, PHASE_FINALIZING);
            self.remote
                .finish_large_file(&handle.file_id, &piece_hashes)
                .await
                .map_err(display)
        }
        .await;

        if result.is_err() {
            if let Err(e) = self.remote.cancel_large_file(&handle.file_id).await {
                tracing::warn!(large_file_id = %handle.file_id, error = %e, "cancel of failed large file did not succeed");
            }
        }
        result
    }
}

fn display<E: std::fmt::Display>(e: E) -> String {
    e.to_string()
}
