//! Client upload protocol: single-shot and resumable chunked uploads.

use crate::auth::Owner;
use crate::error::{ApiError, ApiResult};
use crate::quota::quota_shortfall;
use crate::staging::{IncomingFile, StagingArea};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use stowage_core::chunking::ChunkGeometry;
use stowage_core::file::{ChunkProgressResponse, UploadCompleteResponse};
use stowage_core::hash::ContentHash;
use stowage_core::{TEMPORARY_REF, archive};
use stowage_metadata::{ChunkSessionRow, MetadataError};
use time::OffsetDateTime;

pub const NAME_HEADER: &str = "x-stowage-name";
pub const CHECKSUM_HEADER: &str = "x-stowage-checksum";
pub const SIZE_HEADER: &str = "x-stowage-size";
pub const CHUNK_HEADER: &str = "x-stowage-chunk";

struct UploadRequest {
    name: String,
    checksum: ContentHash,
    checksum_hex: String,
    declared_size: u64,
    chunk_index: Option<u32>,
}

impl UploadRequest {
    fn parse(headers: &HeaderMap, max_file_size: u64) -> ApiResult<Self> {
        let name = header_str(headers, NAME_HEADER)?
            .ok_or_else(|| ApiError::BadRequest(format!("missing {NAME_HEADER} header")))?
            .to_string();
        let raw_checksum = header_str(headers, CHECKSUM_HEADER)?
            .ok_or_else(|| ApiError::BadRequest(format!("missing {CHECKSUM_HEADER} header")))?;
        let checksum = ContentHash::from_hex(raw_checksum)?;

        let declared_size: u64 = header_str(headers, SIZE_HEADER)?
            .ok_or_else(|| ApiError::BadRequest(format!("missing {SIZE_HEADER} header")))?
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("malformed {SIZE_HEADER} header")))?;
        if declared_size == 0 {
            return Err(ApiError::BadRequest("declared size must be positive".into()));
        }
        if declared_size > max_file_size {
            return Err(ApiError::BadRequest(format!(
                "declared size {declared_size} exceeds the {max_file_size} byte limit"
            )));
        }

        let chunk_index = match header_str(headers, CHUNK_HEADER)? {
            None => None,
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                ApiError::BadRequest(format!("malformed {CHUNK_HEADER} header"))
            })?),
        };

        Ok(Self {
            checksum_hex: checksum.to_hex(),
            name,
            checksum,
            declared_size,
            chunk_index,
        })
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> ApiResult<Option<&'h str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("malformed {name} header"))),
    }
}

/// POST /v1/files
#[tracing::instrument(skip_all, fields(owner_id = owner.0, checksum = tracing::field::Empty))]
pub async fn upload_file(
    State(state): State<AppState>,
    owner: Owner,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let request = UploadRequest::parse(&headers, state.config.server.max_file_size)?;
    tracing::Span::current().record("checksum", &request.checksum_hex);

    // Slot claimed before any I/O, returned on every exit path.
    let _slot = state.admission.admit(&request.checksum_hex, owner.0)?;

    // Dedupe: same bytes already stored means no transfer at all.
    if let Some(existing) = state
        .metadata
        .get_file_by_checksum(&request.checksum_hex)
        .await?
    {
        if existing.size_bytes as u64 != request.declared_size {
            return Err(ApiError::SizeMismatch {
                existing: existing.size_bytes as u64,
                declared: request.declared_size,
            });
        }
        state
            .metadata
            .upsert_ref(
                existing.file_id,
                owner.0,
                TEMPORARY_REF,
                OffsetDateTime::now_utc(),
            )
            .await?;
        tracing::debug!(checksum = %request.checksum_hex, "upload deduplicated");
        return Ok(complete_response(&request.checksum_hex));
    }

    enforce_quota(&state, owner.0, request.declared_size).await?;

    match request.chunk_index {
        None => single_shot(&state, owner.0, &request, body).await,
        Some(index) => receive_chunk(&state, owner.0, &request, index, body).await,
    }
}

async fn enforce_quota(state: &AppState, owner_id: i64, incoming_bytes: u64) -> ApiResult<()> {
    let usage = state.tracker.usage(owner_id).await?;
    let Some(shortfall) = quota_shortfall(&usage, &state.config.quota, incoming_bytes) else {
        return Ok(());
    };
    if shortfall.files == 0 && shortfall.bytes == 0 {
        // Remote-pool limits cannot be relieved by local reclaim.
        return Err(ApiError::QuotaExceeded(shortfall.reason));
    }

    tracing::info!(owner_id, reason = %shortfall.reason, "quota exceeded, trying emergency reclaim");
    state
        .gc
        .emergency_reclaim(owner_id, shortfall.files, shortfall.bytes)
        .await?;

    let usage = state.tracker.usage(owner_id).await?;
    match quota_shortfall(&usage, &state.config.quota, incoming_bytes) {
        None => Ok(()),
        Some(still) => Err(ApiError::QuotaExceeded(still.reason)),
    }
}

async fn single_shot(
    state: &AppState,
    owner_id: i64,
    request: &UploadRequest,
    body: Body,
) -> ApiResult<Response> {
    let incoming = state
        .staging
        .receive(body.into_data_stream(), request.declared_size)
        .await?;
    if let Err(e) = verify_body(request, &incoming, request.declared_size, true) {
        state.staging.discard(&incoming.temp).await;
        return Err(e);
    }
    state
        .staging
        .promote(&incoming.temp, &request.checksum_hex)
        .await?;
    record_stored_file(state, owner_id, request).await?;
    tracing::info!(checksum = %request.checksum_hex, size = request.declared_size, "single-shot upload staged");
    Ok(complete_response(&request.checksum_hex))
}

/// Shared body checks; the caller discards the temp file on error.
fn verify_body(
    request: &UploadRequest,
    incoming: &IncomingFile,
    expected_size: u64,
    whole_file: bool,
) -> ApiResult<()> {
    if incoming.size != expected_size {
        return Err(ApiError::BadRequest(format!(
            "body was {} bytes, expected {expected_size}",
            incoming.size
        )));
    }
    if whole_file {
        archive::sniff(&incoming.leading)?;
        if incoming.hash != request.checksum {
            return Err(stowage_core::Error::ChecksumMismatch {
                expected: request.checksum_hex.clone(),
                actual: incoming.hash.to_hex(),
            }
            .into());
        }
    }
    Ok(())
}

async fn receive_chunk(
    state: &AppState,
    owner_id: i64,
    request: &UploadRequest,
    index: u32,
    body: Body,
) -> ApiResult<Response> {
    let now = OffsetDateTime::now_utc();
    let session = load_or_create_session(state, request, now).await?;
    let geometry = ChunkGeometry::from_parts(
        session.total_size as u64,
        session.chunk_size as u64,
        session.chunk_count as u32,
    );
    if index >= geometry.chunk_count {
        return Err(stowage_core::Error::InvalidChunkIndex {
            index,
            total: geometry.chunk_count,
        }
        .into());
    }

    let expected = geometry.expected_size(index)?;
    let incoming = state
        .staging
        .receive(body.into_data_stream(), expected)
        .await?;
    if incoming.size != expected {
        state.staging.discard(&incoming.temp).await;
        return Err(ApiError::ChunkSize {
            index,
            expected,
            actual: incoming.size,
        });
    }
    // The archive magic lives in the first chunk.
    if index == 0 {
        if let Err(e) = archive::sniff(&incoming.leading) {
            state.staging.discard(&incoming.temp).await;
            return Err(e.into());
        }
    }

    let chunk_name = StagingArea::chunk_name(&request.checksum_hex, index);
    state.staging.promote(&incoming.temp, &chunk_name).await?;

    // Slot registration is atomic in the store; `missing` must come from
    // the post-update slots or a concurrent chunk goes unseen.
    let slots = state
        .metadata
        .record_session_slot(&request.checksum_hex, index, &chunk_name, now)
        .await?;

    let missing: Vec<u32> = slots
        .iter()
        .enumerate()
        .filter(|(_, name)| name.is_empty())
        .map(|(i, _)| i as u32)
        .collect();
    if !missing.is_empty() {
        return Ok(Json(ChunkProgressResponse {
            total: geometry.chunk_count,
            next: missing,
            chunk: geometry.chunk_size,
        })
        .into_response());
    }

    assemble_session(state, owner_id, request, &slots).await
}

async fn load_or_create_session(
    state: &AppState,
    request: &UploadRequest,
    now: OffsetDateTime,
) -> ApiResult<ChunkSessionRow> {
    if let Some(session) = state.metadata.get_session(&request.checksum_hex).await? {
        // A resume replays the geometry the first chunk fixed.
        if session.total_size as u64 != request.declared_size {
            return Err(ApiError::BadRequest(format!(
                "declared size {} differs from the session's {}",
                request.declared_size, session.total_size
            )));
        }
        return Ok(session);
    }

    let geometry = ChunkGeometry::split(
        request.declared_size,
        state.config.server.target_chunk_size,
    )?;
    let slots = vec![String::new(); geometry.chunk_count as usize];
    let session = ChunkSessionRow {
        checksum: request.checksum_hex.clone(),
        total_size: geometry.total_size as i64,
        chunk_size: geometry.chunk_size as i64,
        chunk_count: geometry.chunk_count as i64,
        chunk_files: ChunkSessionRow::encode_slots(&slots)?,
        touched_at: now,
    };
    match state.metadata.create_session(&session).await {
        Ok(()) => Ok(session),
        // Lost a race with a parallel chunk of the same upload.
        Err(MetadataError::AlreadyExists(_)) => state
            .metadata
            .get_session(&request.checksum_hex)
            .await?
            .ok_or_else(|| ApiError::Internal("chunk session vanished".into())),
        Err(e) => Err(e.into()),
    }
}

async fn assemble_session(
    state: &AppState,
    owner_id: i64,
    request: &UploadRequest,
    slots: &[String],
) -> ApiResult<Response> {
    let (temp, hash) = state.staging.assemble(slots).await?;

    let release = async {
        for name in slots {
            let _ = state.staging.remove(name).await;
        }
        let _ = state.metadata.delete_session(&request.checksum_hex).await;
    };

    if hash != request.checksum {
        state.staging.discard(&temp).await;
        release.await;
        return Err(stowage_core::Error::ChecksumMismatch {
            expected: request.checksum_hex.clone(),
            actual: hash.to_hex(),
        }
        .into());
    }

    state.staging.promote(&temp, &request.checksum_hex).await?;
    release.await;
    record_stored_file(state, owner_id, request).await?;
    tracing::info!(checksum = %request.checksum_hex, size = request.declared_size, "chunked upload assembled");
    Ok(complete_response(&request.checksum_hex))
}

async fn record_stored_file(
    state: &AppState,
    owner_id: i64,
    request: &UploadRequest,
) -> ApiResult<()> {
    let now = OffsetDateTime::now_utc();
    let file_id = match state
        .metadata
        .create_file(
            &request.checksum_hex,
            &request.name,
            request.declared_size as i64,
            now,
        )
        .await
    {
        Ok(id) => id,
        // Identical bytes landed through another request meanwhile.
        Err(MetadataError::AlreadyExists(_)) => state
            .metadata
            .get_file_by_checksum(&request.checksum_hex)
            .await?
            .map(|f| f.file_id)
            .ok_or_else(|| ApiError::Internal("stored file vanished".into()))?,
        Err(e) => return Err(e.into()),
    };
    state
        .metadata
        .upsert_ref(file_id, owner_id, TEMPORARY_REF, now)
        .await?;
    Ok(())
}

fn complete_response(checksum_hex: &str) -> Response {
    Json(UploadCompleteResponse {
        url: checksum_hex.to_string(),
    })
    .into_response()
}

/// DELETE /v1/files/{checksum}/session
#[tracing::instrument(skip(state), fields(owner_id = owner.0))]
pub async fn discard_session(
    State(state): State<AppState>,
    owner: Owner,
    Path(checksum): Path<String>,
) -> ApiResult<StatusCode> {
    let checksum = ContentHash::from_hex(&checksum)?.to_hex();
    let Some(session) = state.metadata.get_session(&checksum).await? else {
        return Err(ApiError::NotFound(format!("no chunk session for {checksum}")));
    };
    for name in session.slots()? {
        if !name.is_empty() {
            state.staging.remove(&name).await?;
        }
    }
    state.metadata.delete_session(&checksum).await?;
    tracing::info!(checksum, "chunk session discarded");
    Ok(StatusCode::NO_CONTENT)
}
