//! HTTP client for the vendor API.

use crate::error::{RemoteError, RemoteResult};
use crate::limiter::{CallKind, RateLimiter};
use crate::retry::{classify_failure, with_retry};
use crate::types::{
    AccountAuth, BucketList, CachedAuth, DownloadAuth, FileNameList, LargeFileHandle, PartUpload,
    RemoteFileInfo, UploadTarget,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use stowage_core::config::RemoteConfig;
use stowage_core::hash::ContentHash;
use time::OffsetDateTime;
use tokio::sync::Mutex;

const API_VERSION: &str = "b2api/v2";

/// Re-authorize this long before the token actually expires.
const AUTH_EXPIRY_MARGIN: Duration = Duration::from_secs(300);

pub struct RemoteClient {
    http: reqwest::Client,
    config: RemoteConfig,
    limiter: RateLimiter,
    auth: Mutex<Option<CachedAuth>>,
}

impl RemoteClient {
    pub fn new(config: RemoteConfig) -> Self {
        let limiter = RateLimiter::new(config.hourly_call_budget);
        Self {
            http: reqwest::Client::new(),
            config,
            limiter,
            auth: Mutex::new(None),
        }
    }

    /// Object name under the configured prefix for a content checksum.
    pub fn remote_name(&self, checksum: &str) -> String {
        format!("{}/{}", self.config.prefix, checksum)
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms)
    }

    /// Part size the vendor recommends for multi-part uploads.
    pub async fn recommended_part_size(&self) -> RemoteResult<u64> {
        Ok(self.authorized().await?.auth.recommended_part_size)
    }

    /// Current auth record, refreshing when absent or near expiry.
    async fn authorized(&self) -> RemoteResult<CachedAuth> {
        let mut slot = self.auth.lock().await;
        if let Some(cached) = slot.as_ref() {
            let ttl = Duration::from_secs(self.config.auth_ttl_secs)
                .saturating_sub(AUTH_EXPIRY_MARGIN);
            let age = OffsetDateTime::now_utc() - cached.obtained_at;
            if age < ttl {
                return Ok(cached.clone());
            }
        }
        let fresh = self.authorize().await?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    async fn forget_auth(&self) {
        *self.auth.lock().await = None;
    }

    async fn authorize(&self) -> RemoteResult<CachedAuth> {
        self.limiter.acquire(CallKind::Authorize)?;
        let url = format!(
            "{}/{}/b2_authorize_account",
            self.config.api_url.trim_end_matches('/'),
            API_VERSION
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.application_key))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        let auth: AccountAuth = response.json().await?;
        let bucket_id = self.resolve_bucket(&auth).await?;
        tracing::debug!(bucket_id, api_url = %auth.api_url, "remote account authorized");
        Ok(CachedAuth {
            auth,
            bucket_id,
            obtained_at: OffsetDateTime::now_utc(),
        })
    }

    async fn resolve_bucket(&self, auth: &AccountAuth) -> RemoteResult<String> {
        // Bucket-scoped keys name their bucket in the auth response already.
        if let Some(bucket_id) = &auth.allowed.bucket_id {
            let named = auth.allowed.bucket_name.as_deref();
            if named.is_none() || named == Some(self.config.bucket_name.as_str()) {
                return Ok(bucket_id.clone());
            }
            return Err(RemoteError::BucketNotFound(self.config.bucket_name.clone()));
        }

        self.limiter.acquire(CallKind::ListFiles)?;
        let url = format!(
            "{}/{}/b2_list_buckets",
            auth.api_url.trim_end_matches('/'),
            API_VERSION
        );
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &auth.authorization_token)
            .json(&json!({
                "accountId": auth.account_id,
                "bucketName": self.config.bucket_name,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        let list: BucketList = response.json().await?;
        list.buckets
            .into_iter()
            .find(|b| b.bucket_name == self.config.bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| RemoteError::BucketNotFound(self.config.bucket_name.clone()))
    }

    /// One authorized POST against the account API endpoint.
    ///
    /// An expired token drops the cache so the enclosing retry loop picks up
    /// a fresh one.
    async fn api_post<T: DeserializeOwned>(
        &self,
        kind: CallKind,
        operation: &str,
        body: serde_json::Value,
    ) -> RemoteResult<T> {
        self.limiter.acquire(kind)?;
        let cached = self.authorized().await?;
        let url = format!(
            "{}/{}/{}",
            cached.auth.api_url.trim_end_matches('/'),
            API_VERSION,
            operation
        );
        let response = self
            .http
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                &cached.auth.authorization_token,
            )
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let err = classify_failure(response).await;
            if matches!(err, RemoteError::Unauthorized(_)) {
                self.forget_auth().await;
            }
            return Err(err);
        }
        Ok(response.json().await?)
    }

    async fn bucket_id(&self) -> RemoteResult<String> {
        Ok(self.authorized().await?.bucket_id)
    }

    /// Fetch a single-shot upload endpoint.
    pub async fn get_upload_url(&self) -> RemoteResult<UploadTarget> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            let bucket_id = self.bucket_id().await?;
            self.api_post(
                CallKind::GetUploadUrl,
                "b2_get_upload_url",
                json!({ "bucketId": bucket_id }),
            )
            .await
        })
        .await
    }

    /// Upload a whole object in one request.
    ///
    /// `info` pairs become `X-Bz-Info-*` headers on the stored object. A
    /// failed attempt invalidates its upload endpoint, so each retry fetches
    /// a fresh one.
    pub async fn upload_file(
        &self,
        name: &str,
        info: &[(&str, String)],
        data: Bytes,
    ) -> RemoteResult<RemoteFileInfo> {
        let sha1 = ContentHash::compute(&data).to_hex();
        with_retry(self.config.retry_attempts, self.retry_delay(), || {
            let data = data.clone();
            let sha1 = sha1.clone();
            async move {
                let target = {
                    let bucket_id = self.bucket_id().await?;
                    self.api_post::<UploadTarget>(
                        CallKind::GetUploadUrl,
                        "b2_get_upload_url",
                        json!({ "bucketId": bucket_id }),
                    )
                    .await?
                };
                self.limiter.acquire(CallKind::UploadFile)?;
                let mut request = self
                    .http
                    .post(&target.upload_url)
                    .header(reqwest::header::AUTHORIZATION, &target.authorization_token)
                    .header("X-Bz-File-Name", encode_file_name(name))
                    .header("X-Bz-Content-Sha1", &sha1)
                    .header(reqwest::header::CONTENT_TYPE, "b2/x-auto")
                    .header(reqwest::header::CONTENT_LENGTH, data.len());
                for (key, value) in info {
                    request = request.header(format!("X-Bz-Info-{key}"), encode_file_name(value));
                }
                let response = request.body(data).send().await?;
                if !response.status().is_success() {
                    return Err(classify_failure(response).await);
                }
                Ok(response.json().await?)
            }
        })
        .await
    }

    /// Begin a multi-part upload.
    pub async fn start_large_file(&self, name: &str) -> RemoteResult<LargeFileHandle> {
        let encoded = encode_file_name(name);
        with_retry(self.config.retry_attempts, self.retry_delay(), || {
            let encoded = encoded.clone();
            async move {
                let bucket_id = self.bucket_id().await?;
                self.api_post(
                    CallKind::StartLargeFile,
                    "b2_start_large_file",
                    json!({
                        "bucketId": bucket_id,
                        "fileName": encoded,
                        "contentType": "b2/x-auto",
                    }),
                )
                .await
            }
        })
        .await
    }

    /// Fetch a part upload endpoint for an open large file.
    pub async fn get_upload_part_url(&self, file_id: &str) -> RemoteResult<UploadTarget> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            self.api_post(
                CallKind::GetPartUrl,
                "b2_get_upload_part_url",
                json!({ "fileId": file_id }),
            )
            .await
        })
        .await
    }

    /// Upload one part of a large file. Part numbers start at 1.
    ///
    /// Returns the part's hex SHA-1 for the finish call. Retries fetch a
    /// fresh part endpoint per vendor protocol.
    pub async fn upload_part(
        &self,
        file_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> RemoteResult<String> {
        let sha1 = ContentHash::compute(&data).to_hex();
        let confirmed: PartUpload = with_retry(
            self.config.retry_attempts,
            self.retry_delay(),
            || {
                let data = data.clone();
                let sha1 = sha1.clone();
                async move {
                    let target = self
                        .api_post::<UploadTarget>(
                            CallKind::GetPartUrl,
                            "b2_get_upload_part_url",
                            json!({ "fileId": file_id }),
                        )
                        .await?;
                    self.limiter.acquire(CallKind::UploadPart)?;
                    let response = self
                        .http
                        .post(&target.upload_url)
                        .header(reqwest::header::AUTHORIZATION, &target.authorization_token)
                        .header("X-Bz-Part-Number", part_number)
                        .header("X-Bz-Content-Sha1", &sha1)
                        .header(reqwest::header::CONTENT_LENGTH, data.len())
                        .body(data)
                        .send()
                        .await?;
                    if !response.status().is_success() {
                        return Err(classify_failure(response).await);
                    }
                    Ok(response.json().await?)
                }
            },
        )
        .await?;
        if confirmed.content_sha1 != sha1 {
            return Err(RemoteError::Rejected {
                status: 200,
                code: "part_checksum_mismatch".to_string(),
                message: format!(
                    "part {part_number}: sent {sha1}, vendor recorded {}",
                    confirmed.content_sha1
                ),
            });
        }
        Ok(sha1)
    }

    /// Complete a multi-part upload from its ordered part checksums.
    pub async fn finish_large_file(
        &self,
        file_id: &str,
        part_sha1s: &[String],
    ) -> RemoteResult<RemoteFileInfo> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            self.api_post(
                CallKind::FinishLargeFile,
                "b2_finish_large_file",
                json!({ "fileId": file_id, "partSha1Array": part_sha1s }),
            )
            .await
        })
        .await
    }

    /// Abandon an unfinished large file, discarding its parts.
    pub async fn cancel_large_file(&self, file_id: &str) -> RemoteResult<()> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            self.api_post::<serde_json::Value>(
                CallKind::CancelLargeFile,
                "b2_cancel_large_file",
                json!({ "fileId": file_id }),
            )
            .await
        })
        .await?;
        Ok(())
    }

    /// List one page of stored objects under a name prefix.
    pub async fn list_files(
        &self,
        prefix: &str,
        start_name: Option<&str>,
        max_count: u32,
    ) -> RemoteResult<FileNameList> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            let bucket_id = self.bucket_id().await?;
            let mut body = json!({
                "bucketId": bucket_id,
                "prefix": prefix,
                "maxFileCount": max_count,
            });
            if let Some(start) = start_name {
                body["startFileName"] = json!(start);
            }
            self.api_post(CallKind::ListFiles, "b2_list_file_names", body)
                .await
        })
        .await
    }

    /// List every stored object under a name prefix, following pagination.
    pub async fn list_all_files(&self, prefix: &str) -> RemoteResult<Vec<RemoteFileInfo>> {
        let mut all = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let page = self.list_files(prefix, start.as_deref(), 1000).await?;
            all.extend(page.files);
            match page.next_file_name {
                Some(next) => start = Some(next),
                None => return Ok(all),
            }
        }
    }

    /// List unfinished multi-part uploads on the bucket.
    pub async fn list_unfinished_large_files(&self) -> RemoteResult<Vec<RemoteFileInfo>> {
        let list: FileNameList =
            with_retry(self.config.retry_attempts, self.retry_delay(), || async {
                let bucket_id = self.bucket_id().await?;
                self.api_post(
                    CallKind::ListFiles,
                    "b2_list_unfinished_large_files",
                    json!({ "bucketId": bucket_id }),
                )
                .await
            })
            .await?;
        Ok(list.files)
    }

    /// Delete one stored object version.
    pub async fn delete_file_version(&self, file_id: &str, file_name: &str) -> RemoteResult<()> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            self.api_post::<serde_json::Value>(
                CallKind::DeleteFileVersion,
                "b2_delete_file_version",
                json!({ "fileId": file_id, "fileName": file_name }),
            )
            .await
        })
        .await?;
        Ok(())
    }

    /// Fetch the vendor's record of one stored object.
    pub async fn get_file_info(&self, file_id: &str) -> RemoteResult<RemoteFileInfo> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            self.api_post(
                CallKind::GetFileInfo,
                "b2_get_file_info",
                json!({ "fileId": file_id }),
            )
            .await
        })
        .await
    }

    /// Server-side copy of a stored object to a new name.
    pub async fn copy_file(
        &self,
        source_file_id: &str,
        new_name: &str,
    ) -> RemoteResult<RemoteFileInfo> {
        let encoded = encode_file_name(new_name);
        with_retry(self.config.retry_attempts, self.retry_delay(), || {
            let encoded = encoded.clone();
            async move {
                self.api_post(
                    CallKind::CopyFile,
                    "b2_copy_file",
                    json!({ "sourceFileId": source_file_id, "fileName": encoded }),
                )
                .await
            }
        })
        .await
    }

    /// Token allowing direct downloads under a name prefix.
    pub async fn get_download_authorization(
        &self,
        file_name_prefix: &str,
        valid_secs: u64,
    ) -> RemoteResult<DownloadAuth> {
        with_retry(self.config.retry_attempts, self.retry_delay(), || async {
            let bucket_id = self.bucket_id().await?;
            self.api_post(
                CallKind::DownloadAuth,
                "b2_get_download_authorization",
                json!({
                    "bucketId": bucket_id,
                    "fileNamePrefix": file_name_prefix,
                    "validDurationInSeconds": valid_secs,
                }),
            )
            .await
        })
        .await
    }
}

/// Percent-encode an object name, leaving '/' and unreserved bytes intact.
fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
