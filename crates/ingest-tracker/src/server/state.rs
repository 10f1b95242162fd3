//! Application state for the tracker server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::driver::{JobDriver, OcrJobProvider};
use crate::error::Result;
use crate::processing::{parallel_extractions, ExtractionQueue, ExtractionWorker};
use crate::providers::{
    BlobStore, BroadcastBus, FanoutBus, HttpOcrProvider, LocalBlobStore, NotificationBus,
    WebhookBus,
};
use crate::query::StatusQuery;
use crate::relay::NotificationRelay;
use crate::storage::{SqliteTrackingStore, TrackingStore};
use crate::tracking::VersionTracker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: TrackerConfig,
    store: Arc<dyn TrackingStore>,
    tracker: Arc<VersionTracker>,
    relay: NotificationRelay,
    query: StatusQuery,
    /// In-process subscribers attach here
    broadcast: Arc<BroadcastBus>,
    extraction_queue: Arc<ExtractionQueue>,
    blobs: Arc<dyn BlobStore>,
    ready: RwLock<bool>,
}

impl AppState {
    /// Build state from configuration: SQLite store, HTTP OCR provider,
    /// local blob store. Spawns the extraction worker.
    pub async fn new(config: TrackerConfig) -> Result<Self> {
        tracing::info!("Initializing tracker state...");

        let store = Arc::new(SqliteTrackingStore::new(&config.store.path)?);
        tracing::info!("Tracking store opened at {}", config.store.path.display());

        let provider = Arc::new(HttpOcrProvider::new(&config.ocr)?);
        tracing::info!("OCR provider at {}", config.ocr.base_url);

        let blobs = Arc::new(LocalBlobStore::new(&config.blobs.root)?);
        tracing::info!("Blob store rooted at {}", config.blobs.root.display());

        Self::from_parts(config, store, provider, blobs)
    }

    /// Build state around injected collaborators. Must be called inside a
    /// tokio runtime; the extraction worker is spawned onto it.
    pub fn from_parts(
        config: TrackerConfig,
        store: Arc<dyn TrackingStore>,
        provider: Arc<dyn OcrJobProvider>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        let tracker = Arc::new(VersionTracker::new(store.clone(), config.tracking.clone()));

        let broadcast = Arc::new(BroadcastBus::new(config.notifications.channel_capacity));
        let local: Arc<dyn NotificationBus> = broadcast.clone();
        let bus: Arc<dyn NotificationBus> = match &config.notifications.webhook_url {
            Some(url) => {
                tracing::info!("Publishing notifications to webhook {}", url);
                let webhook: Arc<dyn NotificationBus> = Arc::new(WebhookBus::new(url.clone())?);
                Arc::new(FanoutBus::new(vec![local, webhook]))
            }
            None => local,
        };

        let relay = NotificationRelay::new(tracker.clone(), bus);
        let query = StatusQuery::new(tracker.clone());

        let worker_count = parallel_extractions(&config);
        let (queue, receiver) =
            ExtractionQueue::new(worker_count, config.processing.queue_capacity);
        let extraction_queue = Arc::new(queue);
        let driver = Arc::new(JobDriver::new(provider, &config.driver));
        let worker = ExtractionWorker::new(
            extraction_queue.clone(),
            driver,
            blobs.clone(),
            tracker.clone(),
            &config,
        );
        tokio::spawn(async move {
            worker.run(receiver).await;
        });

        tracing::info!("Extraction queue initialized with {} workers", worker_count);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                tracker,
                relay,
                query,
                broadcast,
                extraction_queue,
                blobs,
                ready: RwLock::new(true),
            }),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.inner.store
    }

    pub fn tracker(&self) -> &Arc<VersionTracker> {
        &self.inner.tracker
    }

    pub fn relay(&self) -> &NotificationRelay {
        &self.inner.relay
    }

    pub fn query(&self) -> &StatusQuery {
        &self.inner.query
    }

    pub fn notifications(&self) -> &Arc<BroadcastBus> {
        &self.inner.broadcast
    }

    pub fn extraction_queue(&self) -> &Arc<ExtractionQueue> {
        &self.inner.extraction_queue
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
