//! Caller identity.
//!
//! Authentication lives in the trusted front layer; it forwards the
//! authenticated owner id in a header. Anything absent or malformed is
//! rejected before a handler runs.

use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const OWNER_HEADER: &str = "x-stowage-owner";

/// Authenticated caller, extracted from the forwarded identity header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub i64);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| ApiError::BadRequest(format!("missing {OWNER_HEADER} header")))?;
        let owner_id = raw
            .to_str()
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| ApiError::BadRequest(format!("malformed {OWNER_HEADER} header")))?;
        Ok(Owner(owner_id))
    }
}
