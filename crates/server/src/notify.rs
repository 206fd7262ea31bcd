//! Outbound notifications to whatever entity references a file.
//!
//! The front layer registers one sink; the queue calls it when a file
//! finishes migrating or fails terminally.

use async_trait::async_trait;

#[async_trait]
pub trait FileEventSink: Send + Sync {
    /// The file reached the remote store and is fully available.
    async fn file_ready(&self, checksum: &str);

    /// The migration attempt failed; the message is shown to the owner
    /// until a later attempt succeeds.
    async fn file_failed(&self, checksum: &str, message: &str);
}

/// Default sink: structured log lines only.
pub struct LogSink;

#[async_trait]
impl FileEventSink for LogSink {
    async fn file_ready(&self, checksum: &str) {
        tracing::info!(checksum, "file ready on remote store");
    }

    async fn file_failed(&self, checksum: &str, message: &str) {
        tracing::warn!(checksum, message, "file migration failed");
    }
}
