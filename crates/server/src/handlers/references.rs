//! Reference-change notifications from the front layer.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use stowage_core::file::{ReferenceChangeRequest, ReferenceChangeResponse};

/// POST /v1/references
pub async fn change_reference(
    State(state): State<AppState>,
    Json(request): Json<ReferenceChangeRequest>,
) -> ApiResult<Json<ReferenceChangeResponse>> {
    let response = state.tracker.change_reference(&request).await?;
    Ok(Json(response))
}
