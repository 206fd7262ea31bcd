//! Health check.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

/// GET /v1/health
///
/// Unauthenticated, for load balancers and probes.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.metadata.health_check().await?;
    Ok(Json(json!({ "status": "ok" })))
}
