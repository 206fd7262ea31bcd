//! Resumable chunked upload tests.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use stowage_core::MIN_CHUNK_SIZE;
use stowage_core::hash::ContentHash;

const CHUNK: usize = MIN_CHUNK_SIZE as usize;

fn chunks_of(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.chunks(CHUNK).collect()
}

#[tokio::test]
async fn test_resumable_six_chunk_upload() {
    let app = spawn_app().await;
    let bytes = archive_bytes(6 * CHUNK, 11);
    let checksum = ContentHash::compute(&bytes).to_hex();
    let total = bytes.len() as u64;
    let chunks = chunks_of(&bytes);
    assert_eq!(chunks.len(), 6);

    // First three chunks land, then the client goes away.
    for index in 0..3u32 {
        let response = app
            .upload_as(1, "big.zip", &checksum, total, Some(index), chunks[index as usize])
            .await;
        let body = assert_status(response, StatusCode::OK).await;
        assert_eq!(body["total"], 6);
        assert_eq!(body["chunk"], CHUNK as u64);
    }

    // The resume's first chunk reports exactly what is still missing.
    let response = app
        .upload_as(1, "big.zip", &checksum, total, Some(3), chunks[3])
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    assert_eq!(body["next"], serde_json::json!([4, 5]));

    for index in 4..6u32 {
        let response = app
            .upload_as(1, "big.zip", &checksum, total, Some(index), chunks[index as usize])
            .await;
        let body = assert_status(response, StatusCode::OK).await;
        if index == 5 {
            assert_eq!(body["url"], checksum);
        }
    }

    // Assembly leaves the whole file and nothing else.
    assert!(app.staging_exists(&checksum));
    for index in 0..6u32 {
        assert!(!app.staging_exists(&format!("{checksum}.c{index}")));
    }
    assert!(app.state.metadata.get_session(&checksum).await.unwrap().is_none());
    let file = app
        .state
        .metadata
        .get_file_by_checksum(&checksum)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.size_bytes as u64, total);
}

#[tokio::test]
async fn test_chunks_accepted_in_any_order() {
    let app = spawn_app().await;
    let bytes = archive_bytes(2 * CHUNK, 12);
    let checksum = ContentHash::compute(&bytes).to_hex();
    let total = bytes.len() as u64;
    let chunks = chunks_of(&bytes);

    let response = app
        .upload_as(1, "a.zip", &checksum, total, Some(1), chunks[1])
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    assert_eq!(body["next"], serde_json::json!([0]));

    let response = app
        .upload_as(1, "a.zip", &checksum, total, Some(0), chunks[0])
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    assert_eq!(body["url"], checksum);
}

#[tokio::test]
async fn test_parallel_chunks_both_recorded() {
    let app = spawn_app().await;
    let bytes = archive_bytes(3 * CHUNK, 19);
    let checksum = ContentHash::compute(&bytes).to_hex();
    let total = bytes.len() as u64;
    let chunks = chunks_of(&bytes);

    let (first, second) = tokio::join!(
        app.upload_as(1, "par.zip", &checksum, total, Some(0), chunks[0]),
        app.upload_as(1, "par.zip", &checksum, total, Some(1), chunks[1]),
    );
    assert_status(first, StatusCode::OK).await;
    assert_status(second, StatusCode::OK).await;

    // Both chunks survive in the session, whatever the interleaving.
    let session = app
        .state
        .metadata
        .get_session(&checksum)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.missing_indices().unwrap(), vec![2]);
    assert!(app.staging_exists(&format!("{checksum}.c0")));
    assert!(app.staging_exists(&format!("{checksum}.c1")));

    let response = app
        .upload_as(1, "par.zip", &checksum, total, Some(2), chunks[2])
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    assert_eq!(body["url"], checksum);
}

#[tokio::test]
async fn test_wrong_chunk_size_is_not_acceptable() {
    let app = spawn_app().await;
    let bytes = archive_bytes(2 * CHUNK, 13);
    let checksum = ContentHash::compute(&bytes).to_hex();

    let response = app
        .upload_as(1, "a.zip", &checksum, bytes.len() as u64, Some(0), &bytes[..100])
        .await;
    let body = assert_status(response, StatusCode::NOT_ACCEPTABLE).await;
    assert_eq!(body["code"], "chunk_size_mismatch");
    assert!(!app.staging_exists(&format!("{checksum}.c0")));
}

#[tokio::test]
async fn test_chunk_index_out_of_range() {
    let app = spawn_app().await;
    let bytes = archive_bytes(2 * CHUNK, 14);
    let checksum = ContentHash::compute(&bytes).to_hex();
    let chunks = chunks_of(&bytes);

    let response = app
        .upload_as(1, "a.zip", &checksum, bytes.len() as u64, Some(9), chunks[0])
        .await;
    let body = assert_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["code"], "invalid_chunk_index");
}

#[tokio::test]
async fn test_resume_with_different_size_is_rejected() {
    let app = spawn_app().await;
    let bytes = archive_bytes(2 * CHUNK, 15);
    let checksum = ContentHash::compute(&bytes).to_hex();
    let chunks = chunks_of(&bytes);

    assert_status(
        app.upload_as(1, "a.zip", &checksum, bytes.len() as u64, Some(0), chunks[0])
            .await,
        StatusCode::OK,
    )
    .await;

    let response = app
        .upload_as(1, "a.zip", &checksum, bytes.len() as u64 + 1, Some(1), chunks[1])
        .await;
    assert_status(response, StatusCode::BAD_REQUEST).await;
}

#[tokio::test]
async fn test_first_chunk_must_carry_archive_magic() {
    let app = spawn_app().await;
    let mut bytes = archive_bytes(2 * CHUNK, 16);
    bytes[..8].copy_from_slice(b"AAAAAAAA");
    let checksum = ContentHash::compute(&bytes).to_hex();
    let chunks = chunks_of(&bytes);

    let response = app
        .upload_as(1, "a.zip", &checksum, bytes.len() as u64, Some(0), chunks[0])
        .await;
    let body = assert_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["code"], "not_an_archive");
}

#[tokio::test]
async fn test_assembly_checksum_mismatch_tears_down_session() {
    let app = spawn_app().await;
    let bytes = archive_bytes(2 * CHUNK, 17);
    // Declared token belongs to different content of the same size.
    let other = archive_bytes(2 * CHUNK, 18);
    let checksum = ContentHash::compute(&other).to_hex();
    let chunks = chunks_of(&bytes);

    assert_status(
        app.upload_as(1, "a.zip", &checksum, bytes.len() as u64, Some(0), chunks[0])
            .await,
        StatusCode::OK,
    )
    .await;
    let response = app
        .upload_as(1, "a.zip", &checksum, bytes.len() as u64, Some(1), chunks[1])
        .await;
    let body = assert_status(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["code"], "checksum_mismatch");

    // The client starts over from a clean slate.
    assert!(app.state.metadata.get_session(&checksum).await.unwrap().is_none());
    assert!(!app.staging_exists(&checksum));
    assert!(!app.staging_exists(&format!("{checksum}.c0")));
    assert!(
        app.state
            .metadata
            .get_file_by_checksum(&checksum)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_discard_session_removes_chunks() {
    let app = spawn_app().await;
    let bytes = archive_bytes(2 * CHUNK, 19);
    let checksum = ContentHash::compute(&bytes).to_hex();
    let chunks = chunks_of(&bytes);

    assert_status(
        app.upload_as(1, "a.zip", &checksum, bytes.len() as u64, Some(0), chunks[0])
            .await,
        StatusCode::OK,
    )
    .await;
    assert!(app.staging_exists(&format!("{checksum}.c0")));

    let request = Request::delete(format!("/v1/files/{checksum}/session"))
        .header(OWNER_HEADER, "1")
        .body(Body::empty())
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(app.state.metadata.get_session(&checksum).await.unwrap().is_none());
    assert!(!app.staging_exists(&format!("{checksum}.c0")));

    // A second discard has nothing to remove.
    let request = Request::delete(format!("/v1/files/{checksum}/session"))
        .header(OWNER_HEADER, "1")
        .body(Body::empty())
        .unwrap();
    let response = app.request(request).await;
    assert_status(response, StatusCode::NOT_FOUND).await;
}
