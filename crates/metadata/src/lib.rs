//! Metadata store for stowage.
//!
//! This crate provides the control-plane data model:
//! - Stored files keyed by content checksum
//! - References joining files to the entities that use them
//! - Resumable chunked upload sessions
//! - Remote cleanup / remote missing reconciliation queues
//!
//! The store is an embedded SQLite database (the same relational store the
//! rest of the application uses), accessed through repository traits so the
//! server code never touches SQL directly.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{
    ChunkSessionRow, FileReferenceRow, RemoteCleanupRow, RemoteMissingRow, StoredFileRow,
    UsageBreakdown, UsageTotals,
};
pub use repos::{CleanupRepo, FileRepo, ReferenceRepo, SessionRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use stowage_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    let store = SqliteStore::new(&config.path).await?;
    Ok(Arc::new(store) as Arc<dyn MetadataStore>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_creates_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("stowage.db");
        let config = MetadataConfig {
            path: db_path.clone(),
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }
}
