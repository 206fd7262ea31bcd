//! Reference tracking between stored files and the entities using them.

use crate::error::{ApiError, ApiResult};
use crate::queue::RemoteUploadQueue;
use std::sync::Arc;
use stowage_core::TEMPORARY_REF;
use stowage_core::file::{ReferenceChangeRequest, ReferenceChangeResponse};
use stowage_metadata::{MetadataStore, UsageBreakdown};
use time::OffsetDateTime;

pub struct ReferenceTracker {
    metadata: Arc<dyn MetadataStore>,
    queue: Arc<RemoteUploadQueue>,
}

impl ReferenceTracker {
    pub fn new(metadata: Arc<dyn MetadataStore>, queue: Arc<RemoteUploadQueue>) -> Arc<Self> {
        Arc::new(Self { metadata, queue })
    }

    /// Upsert a reference. A durable (non-temporary) kind replaces the
    /// owner's temporary reference and promotes the file to the remote
    /// store if it has no remote copy yet.
    pub async fn add_ref(&self, checksum: &str, owner_id: i64, ref_kind: &str) -> ApiResult<()> {
        let file = self.require_file(checksum).await?;
        let now = OffsetDateTime::now_utc();
        if ref_kind == TEMPORARY_REF {
            self.metadata
                .upsert_ref(file.file_id, owner_id, ref_kind, now)
                .await?;
        } else {
            self.metadata
                .upsert_ref_drop_temporary(file.file_id, owner_id, ref_kind, now)
                .await?;
            if file.remote_file_id.is_none() {
                self.queue.ensure_uploaded(checksum);
            }
        }
        Ok(())
    }

    /// Delete a reference. Removing a durable reference leaves a fresh
    /// temporary one behind so a still-staged file is not orphaned at once.
    pub async fn remove_ref(&self, checksum: &str, owner_id: i64, ref_kind: &str) -> ApiResult<bool> {
        let file = self.require_file(checksum).await?;
        let deleted = self
            .metadata
            .delete_ref(file.file_id, owner_id, ref_kind)
            .await?;
        if deleted && ref_kind != TEMPORARY_REF {
            self.metadata
                .upsert_ref(file.file_id, owner_id, TEMPORARY_REF, OffsetDateTime::now_utc())
                .await?;
        }
        Ok(deleted)
    }

    /// Usage totals for quota decisions, split owner/global and local/remote.
    pub async fn usage(&self, owner_id: i64) -> ApiResult<UsageBreakdown> {
        Ok(self.metadata.usage(owner_id).await?)
    }

    /// Apply a reference-change notification from the front layer.
    #[tracing::instrument(skip(self), fields(owner_id = request.owner_id, ref_kind = %request.ref_kind))]
    pub async fn change_reference(
        &self,
        request: &ReferenceChangeRequest,
    ) -> ApiResult<ReferenceChangeResponse> {
        if let Some(old_token) = &request.old_token {
            // The old file may already be gone; that is not the caller's
            // problem.
            match self
                .remove_ref(old_token, request.owner_id, &request.ref_kind)
                .await
            {
                Ok(_) | Err(ApiError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let Some(new_token) = &request.new_token else {
            return Ok(ReferenceChangeResponse {
                processing: false,
                error_msg: None,
            });
        };

        self.add_ref(new_token, request.owner_id, &request.ref_kind)
            .await?;
        let file = self.require_file(new_token).await?;
        Ok(ReferenceChangeResponse {
            processing: file.remote_file_id.is_none(),
            error_msg: self.queue.error_of(new_token),
        })
    }

    async fn require_file(&self, checksum: &str) -> ApiResult<stowage_metadata::StoredFileRow> {
        self.metadata
            .get_file_by_checksum(checksum)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no stored file for token {checksum}")))
    }
}
