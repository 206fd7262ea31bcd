//! Configuration types shared across crates.
//!
//! The configuration is loaded once at startup (figment in the binary) and
//! passed by reference into each component's constructor; nothing mutates it
//! afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Target chunk size used to compute the split geometry for chunked
    /// uploads.
    #[serde(default = "default_target_chunk_size")]
    pub target_chunk_size: u64,
    /// Largest declared size accepted for any upload.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_target_chunk_size() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_max_file_size() -> u64 {
    4 * 1024 * 1024 * 1024 // 4 GiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            target_chunk_size: default_target_chunk_size(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Local staging directory configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory holding content-addressed staged files and partial chunks.
    #[serde(default = "default_staging_path")]
    pub path: PathBuf,
}

fn default_staging_path() -> PathBuf {
    PathBuf::from("./data/staging")
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            path: default_staging_path(),
        }
    }
}

/// Metadata store configuration (embedded SQLite).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/stowage.db")
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Remote object-storage vendor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Vendor API base URL. Override for tests against a mock server.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Account key identifier.
    pub key_id: String,
    /// Application key.
    /// WARNING: prefer the STOWAGE_REMOTE__APPLICATION_KEY env var over
    /// storing the secret in a config file.
    pub application_key: String,
    /// Bucket name to resolve at startup.
    pub bucket_name: String,
    /// Key prefix under which all objects live.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Cached authorization lifetime in seconds.
    #[serde(default = "default_auth_ttl_secs")]
    pub auth_ttl_secs: u64,
    /// Retry attempts per network call.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between retry attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per-hour budget for each API call kind, enforced client-side
    /// independent of the vendor's own limits.
    #[serde(default = "default_hourly_call_budget")]
    pub hourly_call_budget: u32,
}

fn default_api_url() -> String {
    "https://api.backblazeb2.com".to_string()
}

fn default_prefix() -> String {
    "files".to_string()
}

fn default_auth_ttl_secs() -> u64 {
    12 * 3600
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_hourly_call_budget() -> u32 {
    3600
}

/// Concurrent-upload admission limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Concurrent client uploads across all callers.
    #[serde(default = "default_global_uploads")]
    pub global_uploads: u32,
    /// Concurrent client uploads per checksum (parallel chunks).
    #[serde(default = "default_per_checksum_uploads")]
    pub per_checksum_uploads: u32,
    /// Concurrent client uploads per caller.
    #[serde(default = "default_per_owner_uploads")]
    pub per_owner_uploads: u32,
}

fn default_global_uploads() -> u32 {
    20
}

fn default_per_checksum_uploads() -> u32 {
    4
}

fn default_per_owner_uploads() -> u32 {
    5
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global_uploads: default_global_uploads(),
            per_checksum_uploads: default_per_checksum_uploads(),
            per_owner_uploads: default_per_owner_uploads(),
        }
    }
}

/// Storage quota budgets, split by pool (local staging vs already remote)
/// and scope (per owner vs global). Zero disables a budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_owner_local_files")]
    pub owner_local_files: u64,
    #[serde(default = "default_owner_local_bytes")]
    pub owner_local_bytes: u64,
    #[serde(default = "default_owner_remote_files")]
    pub owner_remote_files: u64,
    #[serde(default = "default_owner_remote_bytes")]
    pub owner_remote_bytes: u64,
    #[serde(default = "default_global_local_files")]
    pub global_local_files: u64,
    #[serde(default = "default_global_local_bytes")]
    pub global_local_bytes: u64,
    #[serde(default)]
    pub global_remote_files: u64,
    #[serde(default)]
    pub global_remote_bytes: u64,
}

fn default_owner_local_files() -> u64 {
    20
}

fn default_owner_local_bytes() -> u64 {
    8 * 1024 * 1024 * 1024 // 8 GiB
}

fn default_owner_remote_files() -> u64 {
    500
}

fn default_owner_remote_bytes() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GiB
}

fn default_global_local_files() -> u64 {
    200
}

fn default_global_local_bytes() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GiB
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            owner_local_files: default_owner_local_files(),
            owner_local_bytes: default_owner_local_bytes(),
            owner_remote_files: default_owner_remote_files(),
            owner_remote_bytes: default_owner_remote_bytes(),
            global_local_files: default_global_local_files(),
            global_local_bytes: default_global_local_bytes(),
            global_remote_files: 0,
            global_remote_bytes: 0,
        }
    }
}

/// Remote upload queue configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrent remote uploads; further checksums park in the waiting set.
    #[serde(default = "default_queue_max_active")]
    pub max_active: u32,
    /// Cooldown after a failed upload before the checksum is re-eligible.
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    /// Fallback part size when the vendor does not recommend one.
    #[serde(default = "default_part_size")]
    pub fallback_part_size: u64,
}

fn default_queue_max_active() -> u32 {
    4
}

fn default_error_cooldown_secs() -> u64 {
    600 // 10 minutes
}

fn default_part_size() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_active: default_queue_max_active(),
            error_cooldown_secs: default_error_cooldown_secs(),
            fallback_part_size: default_part_size(),
        }
    }
}

impl QueueConfig {
    /// Get the error cooldown as a Duration.
    pub fn error_cooldown(&self) -> Duration {
        Duration::seconds(self.error_cooldown_secs.min(i64::MAX as u64) as i64)
    }
}

/// Garbage collection configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Age past which temporary references and untouched chunk sessions are
    /// considered lost.
    #[serde(default = "default_lost_age_secs")]
    pub lost_age_secs: u64,
    /// Grace period before an unknown staging file is deleted.
    #[serde(default = "default_staging_grace_secs")]
    pub staging_grace_secs: u64,
    /// Skip re-hashing a limbo file verified within this window.
    #[serde(default = "default_verify_freshness_secs")]
    pub verify_freshness_secs: u64,
    /// Period for database-only routines.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Period for routines that list the remote store.
    #[serde(default = "default_remote_period_secs")]
    pub remote_period_secs: u64,
}

fn default_lost_age_secs() -> u64 {
    5 * 86400
}

fn default_staging_grace_secs() -> u64 {
    3600
}

fn default_verify_freshness_secs() -> u64 {
    86400
}

fn default_period_secs() -> u64 {
    3600
}

fn default_remote_period_secs() -> u64 {
    6 * 3600
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            lost_age_secs: default_lost_age_secs(),
            staging_grace_secs: default_staging_grace_secs(),
            verify_freshness_secs: default_verify_freshness_secs(),
            period_secs: default_period_secs(),
            remote_period_secs: default_remote_period_secs(),
        }
    }
}

impl GcConfig {
    /// Get the lost-age threshold as a Duration.
    pub fn lost_age(&self) -> Duration {
        Duration::seconds(self.lost_age_secs.min(i64::MAX as u64) as i64)
    }

    /// Get the staging grace period as a Duration.
    pub fn staging_grace(&self) -> Duration {
        Duration::seconds(self.staging_grace_secs.min(i64::MAX as u64) as i64)
    }

    /// Get the verification freshness window as a Duration.
    pub fn verify_freshness(&self) -> Duration {
        Duration::seconds(self.verify_freshness_secs.min(i64::MAX as u64) as i64)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Remote vendor credentials and tuning (required).
    pub remote: RemoteConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

impl AppConfig {
    /// Validate configuration invariants. Called once at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.target_chunk_size < crate::MIN_CHUNK_SIZE {
            return Err(format!(
                "server.target_chunk_size must be at least {} bytes",
                crate::MIN_CHUNK_SIZE
            ));
        }
        if self.limits.global_uploads == 0 {
            return Err("limits.global_uploads must be at least 1".to_string());
        }
        if self.queue.max_active == 0 {
            return Err("queue.max_active must be at least 1".to_string());
        }
        if self.remote.retry_attempts == 0 {
            return Err("remote.retry_attempts must be at least 1".to_string());
        }
        if self.gc.period_secs == 0 || self.gc.remote_period_secs == 0 {
            return Err("gc periods must be at least 1 second".to_string());
        }
        Ok(())
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Points the remote client at a placeholder URL;
    /// tests override `remote.api_url` with their mock server.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            staging: StagingConfig::default(),
            metadata: MetadataConfig::default(),
            remote: RemoteConfig {
                api_url: "http://127.0.0.1:0".to_string(),
                key_id: "test-key-id".to_string(),
                application_key: "test-application-key".to_string(),
                bucket_name: "test-bucket".to_string(),
                prefix: default_prefix(),
                auth_ttl_secs: default_auth_ttl_secs(),
                retry_attempts: 3,
                retry_delay_ms: 10,
                hourly_call_budget: default_hourly_call_budget(),
            },
            limits: LimitsConfig::default(),
            quota: QuotaConfig::default(),
            queue: QueueConfig::default(),
            gc: GcConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::for_testing();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = AppConfig::for_testing();
        config.limits.global_uploads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_chunk_size() {
        let mut config = AppConfig::for_testing();
        config.server.target_chunk_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quota_deserialize_with_defaults() {
        let config: QuotaConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.owner_local_files, 20);
        assert_eq!(config.global_remote_files, 0);
    }
}
