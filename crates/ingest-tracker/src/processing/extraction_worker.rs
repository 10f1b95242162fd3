//! Background worker driving extraction jobs

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::driver::{JobDriver, JobOutcome, JobRun};
use crate::error::Result;
use crate::providers::BlobStore;
use crate::tracking::{NewVersion, VersionTracker};

use super::extraction_queue::{ExtractionQueue, ExtractionRequest, ExtractionStatus};

/// Pulls extraction requests off the queue, drives each provider job to an
/// outcome and stores the text (or a placeholder) in the blob store.
///
/// A finished extraction registers a document version with one unit per
/// page. Tracking failures are logged; the text is stored regardless.
pub struct ExtractionWorker {
    queue: Arc<ExtractionQueue>,
    driver: Arc<JobDriver>,
    blobs: Arc<dyn BlobStore>,
    tracker: Arc<VersionTracker>,
    extracted_prefix: String,
    parallel: usize,
}

impl ExtractionWorker {
    pub fn new(
        queue: Arc<ExtractionQueue>,
        driver: Arc<JobDriver>,
        blobs: Arc<dyn BlobStore>,
        tracker: Arc<VersionTracker>,
        config: &TrackerConfig,
    ) -> Self {
        let parallel = parallel_extractions(config);
        tracing::info!(
            "Extraction worker configured: {} parallel jobs via {}",
            parallel,
            driver.provider_name()
        );

        Self {
            queue,
            driver,
            blobs,
            tracker,
            extracted_prefix: config.blobs.extracted_prefix.clone(),
            parallel,
        }
    }

    /// Process requests until the queue's sender side is dropped
    pub async fn run(self, mut receiver: mpsc::Receiver<ExtractionRequest>) {
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let worker = Arc::new(self);

        while let Some(request) = receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = worker.clone();

            tokio::spawn(async move {
                let _permit = permit;
                worker.process(request).await;
            });
        }

        tracing::info!("Extraction worker stopped");
    }

    /// Drive one request to a terminal status
    pub async fn process(&self, request: ExtractionRequest) {
        let id = request.id;
        tracing::info!("Extracting {}/{} ({})", request.bucket, request.key, id);
        self.queue.mark_running(id);

        let mut run = JobRun::default();
        let outcome = self.driver.drive_with(&request.job_spec(), &mut run).await;
        self.queue.record_run(id, &run);

        match outcome {
            Ok(outcome) => {
                if let Err(e) = self.store_outcome(id, &request, &outcome).await {
                    tracing::error!("Failed to store extraction output for {}: {}", id, e);
                    self.queue.mark_failed(id, "blob_store_error", &e.to_string());
                }
            }
            Err(e) => {
                tracing::error!("Extraction {} failed: {}", id, e);
                self.queue.mark_failed(id, e.kind(), &e.to_string());
            }
        }
    }

    async fn store_outcome(
        &self,
        id: Uuid,
        request: &ExtractionRequest,
        outcome: &JobOutcome,
    ) -> Result<()> {
        let key = output_key(&self.extracted_prefix, &request.bucket, &request.key);
        self.blobs.put(&key, outcome.text().as_bytes()).await?;

        let (status, pages) = match outcome {
            JobOutcome::Succeeded(result) => {
                self.track(id, request, result.page_count());
                (ExtractionStatus::Succeeded, result.page_count())
            }
            JobOutcome::TimedOut(job) => {
                tracing::warn!(
                    "Stored placeholder for {} (provider job {} still running)",
                    id,
                    job.job_id
                );
                (ExtractionStatus::TimedOut, 0)
            }
        };

        self.queue.mark_finished(id, status, key, pages);
        Ok(())
    }

    fn track(&self, id: Uuid, request: &ExtractionRequest, pages: usize) {
        let identity = request.identity();
        let version = NewVersion::new(
            identity.base_document_id,
            request.document_name(),
            u32::try_from(pages).unwrap_or(u32::MAX),
        )
        .with_version(identity.document_version)
        .uploaded_at(request.submitted_at);

        match self.tracker.initialize(version) {
            Ok(outcome) => self.queue.mark_tracked(id, outcome.document_id()),
            Err(e) if e.is_soft() => {
                tracing::warn!("Tracking unavailable for extraction {}, continuing: {}", id, e);
            }
            Err(e) => {
                tracing::error!("Could not track extraction {}: {}", id, e);
            }
        }
    }
}

/// Configured parallelism, defaulting to the CPU count capped at 4
pub fn parallel_extractions(config: &TrackerConfig) -> usize {
    config
        .processing
        .parallel_extractions
        .unwrap_or_else(|| num_cpus::get().min(4))
        .max(1)
}

/// Blob key for the extracted text of `bucket/key`
pub fn output_key(prefix: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}{}/{}.txt",
        prefix,
        bucket.trim_matches('/'),
        key.trim_start_matches('/')
    )
}
