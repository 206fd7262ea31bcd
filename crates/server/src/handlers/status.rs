//! Status probe for a content-address token.

use crate::auth::Owner;
use crate::error::{ApiError, ApiResult};
use crate::queue::QueuePosition;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use stowage_core::file::{FileStatus, FileStatusResponse};
use stowage_core::hash::ContentHash;
use time::format_description::well_known::Rfc3339;

/// GET /v1/files/{checksum}
#[tracing::instrument(skip(state), fields(owner_id = owner.0))]
pub async fn file_status(
    State(state): State<AppState>,
    owner: Owner,
    Path(checksum): Path<String>,
) -> ApiResult<Json<FileStatusResponse>> {
    let checksum = ContentHash::from_hex(&checksum)?.to_hex();
    let Some(file) = state.metadata.get_file_by_checksum(&checksum).await? else {
        return Err(ApiError::NotFound(format!("no stored file for {checksum}")));
    };

    let status = if file.remote_file_id.is_some() {
        FileStatus::Ready
    } else {
        match state.queue.position_of(&checksum) {
            Some(QueuePosition::Errored { message }) => FileStatus::Error { message },
            Some(_) => FileStatus::Waiting,
            None => FileStatus::Limbo,
        }
    };

    let created = file
        .created_at
        .format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("timestamp formatting: {e}")))?;
    Ok(Json(FileStatusResponse {
        status,
        size: file.size_bytes as u64,
        name: file.name,
        created,
    }))
}
