//! Application state shared across handlers.

use crate::admission::AdmissionControl;
use crate::gc::GarbageCollector;
use crate::holds::HoldSet;
use crate::notify::FileEventSink;
use crate::queue::RemoteUploadQueue;
use crate::staging::StagingArea;
use crate::tracker::ReferenceTracker;
use std::sync::Arc;
use stowage_core::config::AppConfig;
use stowage_metadata::MetadataStore;
use stowage_remote::RemoteClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metadata: Arc<dyn MetadataStore>,
    pub staging: Arc<StagingArea>,
    pub remote: Arc<RemoteClient>,
    pub holds: Arc<HoldSet>,
    pub admission: Arc<AdmissionControl>,
    pub queue: Arc<RemoteUploadQueue>,
    pub tracker: Arc<ReferenceTracker>,
    pub gc: Arc<GarbageCollector>,
}

impl AppState {
    /// Wire up every component from configuration.
    pub async fn build(
        config: AppConfig,
        sink: Arc<dyn FileEventSink>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let metadata = stowage_metadata::from_config(&config.metadata).await?;
        let staging = StagingArea::new(&config.staging.path)?;
        let remote = Arc::new(RemoteClient::new(config.remote.clone()));
        let holds = HoldSet::new();
        let admission = AdmissionControl::new(config.limits.clone());
        let queue = RemoteUploadQueue::new(
            config.queue.clone(),
            Arc::clone(&metadata),
            Arc::clone(&remote),
            Arc::clone(&staging),
            Arc::clone(&holds),
            sink,
        );
        let tracker = ReferenceTracker::new(Arc::clone(&metadata), Arc::clone(&queue));
        let gc = GarbageCollector::new(
            config.gc.clone(),
            Arc::clone(&metadata),
            Arc::clone(&staging),
            Arc::clone(&holds),
            Arc::clone(&queue),
            Arc::clone(&remote),
        );
        Ok(Self {
            config,
            metadata,
            staging,
            remote,
            holds,
            admission,
            queue,
            tracker,
            gc,
        })
    }
}
