//! Shared test harness: tempdir staging, SQLite metadata, mock vendor API.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use httpmock::MockServer;
use httpmock::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use stowage_core::config::AppConfig;
use stowage_core::hash::ContentHash;
use stowage_server::notify::FileEventSink;
use stowage_server::routes::create_router;
use stowage_server::state::AppState;
use tower::ServiceExt;

pub const OWNER_HEADER: &str = "x-stowage-owner";
pub const NAME_HEADER: &str = "x-stowage-name";
pub const CHECKSUM_HEADER: &str = "x-stowage-checksum";
pub const SIZE_HEADER: &str = "x-stowage-size";
pub const CHUNK_HEADER: &str = "x-stowage-chunk";

/// Sink that records every notification for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub ready: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl FileEventSink for RecordingSink {
    async fn file_ready(&self, checksum: &str) {
        self.ready.lock().unwrap().push(checksum.to_string());
    }

    async fn file_failed(&self, checksum: &str, message: &str) {
        self.failed
            .lock()
            .unwrap()
            .push((checksum.to_string(), message.to_string()));
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub vendor: MockServer,
    pub sink: Arc<RecordingSink>,
    _tempdir: tempfile::TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(adjust: impl FnOnce(&mut AppConfig)) -> TestApp {
    let vendor = MockServer::start();
    let tempdir = tempfile::tempdir().unwrap();

    let mut config = AppConfig::for_testing();
    config.staging.path = tempdir.path().join("staging");
    config.metadata.path = tempdir.path().join("stowage.db");
    config.remote.api_url = vendor.base_url();
    config.remote.retry_delay_ms = 1;
    config.server.target_chunk_size = stowage_core::MIN_CHUNK_SIZE;
    adjust(&mut config);
    config.validate().unwrap();

    let sink = Arc::new(RecordingSink::default());
    let state = AppState::build(config, Arc::clone(&sink) as Arc<dyn FileEventSink>)
        .await
        .unwrap();
    let router = create_router(state.clone());

    TestApp {
        state,
        router,
        vendor,
        sink,
        _tempdir: tempdir,
    }
}

impl TestApp {
    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Single-shot upload of `bytes` for `owner`.
    pub async fn upload(&self, owner: i64, name: &str, bytes: &[u8]) -> Response<Body> {
        let checksum = ContentHash::compute(bytes).to_hex();
        self.upload_as(owner, name, &checksum, bytes.len() as u64, None, bytes)
            .await
    }

    /// Upload with explicit checksum/size/chunk headers.
    pub async fn upload_as(
        &self,
        owner: i64,
        name: &str,
        checksum: &str,
        declared_size: u64,
        chunk: Option<u32>,
        body: &[u8],
    ) -> Response<Body> {
        let mut builder = Request::post("/v1/files")
            .header(OWNER_HEADER, owner.to_string())
            .header(NAME_HEADER, name)
            .header(CHECKSUM_HEADER, checksum)
            .header(SIZE_HEADER, declared_size.to_string());
        if let Some(index) = chunk {
            builder = builder.header(CHUNK_HEADER, index.to_string());
        }
        let request = builder.body(Body::from(body.to_vec())).unwrap();
        self.request(request).await
    }

    pub async fn status_probe(&self, owner: i64, checksum: &str) -> Response<Body> {
        let request = Request::get(format!("/v1/files/{checksum}"))
            .header(OWNER_HEADER, owner.to_string())
            .body(Body::empty())
            .unwrap();
        self.request(request).await
    }

    /// Attach or swap a reference through the front-layer endpoint.
    pub async fn change_reference(
        &self,
        owner: i64,
        kind: &str,
        old_token: Option<&str>,
        new_token: Option<&str>,
    ) -> Response<Body> {
        let request = Request::post("/v1/references")
            .header(OWNER_HEADER, owner.to_string())
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "owner_id": owner,
                    "ref_kind": kind,
                    "old_token": old_token,
                    "new_token": new_token,
                })
                .to_string(),
            ))
            .unwrap();
        self.request(request).await
    }

    /// Poll until the queue is done with the checksum, for better or worse.
    pub async fn settle(&self, checksum: &str) {
        use stowage_server::queue::QueuePosition;
        loop {
            match self.state.queue.position_of(checksum) {
                Some(QueuePosition::Uploading { .. }) | Some(QueuePosition::Waiting) => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                _ => return,
            }
        }
    }

    pub fn staging_exists(&self, name: &str) -> bool {
        self.state.staging.path_of(name).exists()
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn assert_status(response: Response<Body>, expected: StatusCode) -> serde_json::Value {
    let status = response.status();
    let body = body_json(response).await;
    assert_eq!(status, expected, "unexpected status, body: {body}");
    body
}

/// A zip-looking payload of the requested size, deterministic per seed.
pub fn archive_bytes(size: usize, seed: u8) -> Vec<u8> {
    assert!(size >= 8);
    let mut bytes = Vec::with_capacity(size);
    bytes.extend_from_slice(b"PK\x03\x04");
    while bytes.len() < size {
        bytes.push((bytes.len() as u8).wrapping_mul(31).wrapping_add(seed));
    }
    bytes
}

/// Mock account authorization with the given recommended part size.
pub fn mock_vendor_auth(vendor: &MockServer, part_size: u64) {
    vendor.mock(|when, then| {
        when.method(GET).path("/b2api/v2/b2_authorize_account");
        then.status(200).json_body(json!({
            "accountId": "acct-test",
            "authorizationToken": "vendor-token",
            "apiUrl": vendor.base_url(),
            "downloadUrl": vendor.base_url(),
            "recommendedPartSize": part_size,
            "absoluteMinimumPartSize": 16,
            "allowed": {"bucketId": "bkt-test", "bucketName": "test-bucket"}
        }));
    });
}

/// Mock the whole single-shot vendor flow for one object.
pub fn mock_single_shot_upload<'a>(
    vendor: &'a MockServer,
    sha1: &str,
    size: u64,
) -> httpmock::Mock<'a> {
    let file_id = format!("rf-{}", &sha1[..8]);
    let file_name = format!("files/{sha1}");

    vendor.mock(|when, then| {
        when.method(POST).path("/b2api/v2/b2_get_upload_url");
        then.status(200).json_body(json!({
            "uploadUrl": vendor.url("/vendor-upload"),
            "authorizationToken": "upload-token"
        }));
    });
    let upload = vendor.mock(|when, then| {
        when.method(POST)
            .path("/vendor-upload")
            .header("x-bz-content-sha1", sha1.to_string());
        then.status(200).json_body(json!({
            "fileId": file_id,
            "fileName": file_name,
            "contentLength": size,
            "contentSha1": sha1
        }));
    });
    vendor.mock(|when, then| {
        when.method(POST)
            .path("/b2api/v2/b2_get_file_info")
            .json_body(json!({"fileId": file_id}));
        then.status(200).json_body(json!({
            "fileId": file_id,
            "fileName": file_name,
            "contentLength": size,
            "contentSha1": sha1
        }));
    });
    upload
}
