//! Queue of text extraction requests with in-memory progress

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::driver::{JobRun, JobSpec};
use crate::error::{Error, Result};
use crate::types::DocumentIdentity;

/// Extraction request status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Queued,
    Running,
    Succeeded,
    /// Provider job outlived the wait budget; placeholder text was stored
    TimedOut,
    Failed,
}

impl ExtractionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExtractionStatus::Succeeded | ExtractionStatus::TimedOut | ExtractionStatus::Failed
        )
    }
}

/// A document to extract text from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub bucket: String,
    pub key: String,
    /// Upload time; fixes the tracked version of this document
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl ExtractionRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bucket: bucket.into(),
            key: key.into(),
            submitted_at: Utc::now(),
        }
    }

    /// Tracked identity of the uploaded document
    pub fn identity(&self) -> DocumentIdentity {
        DocumentIdentity::from_location(&self.bucket, &self.key, self.submitted_at)
    }

    /// File name shown for the tracked document
    pub fn document_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Provider job spec; the request id doubles as the idempotency token
    pub fn job_spec(&self) -> JobSpec {
        JobSpec::new(&self.bucket, &self.key).with_client_token(self.id.to_string())
    }
}

/// Progress of one extraction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionProgress {
    pub id: Uuid,
    pub bucket: String,
    pub key: String,
    pub status: ExtractionStatus,
    pub provider_job_id: Option<String>,
    /// Tracked version, once registered with the tracker
    pub document_id: Option<String>,
    /// Blob key holding the extracted text or the placeholder
    pub output_key: Option<String>,
    pub pages: usize,
    pub poll_rounds: u32,
    pub rate_limit_waits: u32,
    /// Driver error kind when failed
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionProgress {
    pub fn new(request: &ExtractionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: request.id,
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            status: ExtractionStatus::Queued,
            provider_job_id: None,
            document_id: None,
            output_key: None,
            pages: 0,
            poll_rounds: 0,
            rate_limit_waits: 0,
            error_kind: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub worker_count: usize,
}

/// Hands extraction requests to the worker and keeps their progress
pub struct ExtractionQueue {
    jobs: Arc<DashMap<Uuid, ExtractionProgress>>,
    sender: mpsc::Sender<ExtractionRequest>,
    worker_count: usize,
    in_flight: AtomicUsize,
}

impl ExtractionQueue {
    pub fn new(worker_count: usize, capacity: usize) -> (Self, mpsc::Receiver<ExtractionRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let queue = Self {
            jobs: Arc::new(DashMap::new()),
            sender,
            worker_count,
            in_flight: AtomicUsize::new(0),
        };

        (queue, receiver)
    }

    /// Enqueue a request, returning its id
    pub async fn submit(&self, request: ExtractionRequest) -> Result<Uuid> {
        if request.bucket.trim().is_empty() || request.key.trim().is_empty() {
            return Err(Error::malformed("extraction needs both bucket and key"));
        }

        let id = request.id;
        match self.jobs.entry(id) {
            Entry::Occupied(_) => {
                return Err(Error::DuplicateVersion(format!("extraction {}", id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(ExtractionProgress::new(&request));
            }
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.sender.send(request).await {
            tracing::error!("Failed to queue extraction {}: {}", id, e);
            self.mark_failed(id, "queue_closed", &e.to_string());
            return Err(Error::internal(format!("extraction queue closed: {}", e)));
        }

        tracing::info!("Queued extraction {}", id);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<ExtractionProgress> {
        self.jobs.get(&id).map(|p| p.clone())
    }

    /// All requests, oldest first
    pub fn list(&self) -> Vec<ExtractionProgress> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|p| p.created_at);
        jobs
    }

    pub fn mark_running(&self, id: Uuid) {
        if let Some(mut progress) = self.jobs.get_mut(&id) {
            progress.status = ExtractionStatus::Running;
            progress.updated_at = Utc::now();
        }
    }

    /// Record the driver counters gathered so far
    pub fn record_run(&self, id: Uuid, run: &JobRun) {
        if let Some(mut progress) = self.jobs.get_mut(&id) {
            progress.provider_job_id = run.job_id.clone();
            progress.poll_rounds = run.poll_rounds;
            progress.rate_limit_waits = run.rate_limit_waits;
            progress.updated_at = Utc::now();
        }
    }

    /// Link a request to its tracked document version
    pub fn mark_tracked(&self, id: Uuid, document_id: &str) {
        if let Some(mut progress) = self.jobs.get_mut(&id) {
            progress.document_id = Some(document_id.to_string());
            progress.updated_at = Utc::now();
        }
    }

    /// Finish a request with stored output
    pub fn mark_finished(
        &self,
        id: Uuid,
        status: ExtractionStatus,
        output_key: String,
        pages: usize,
    ) {
        self.finish(id, |progress| {
            progress.status = status;
            progress.output_key = Some(output_key);
            progress.pages = pages;
        });
    }

    pub fn mark_failed(&self, id: Uuid, kind: &str, error: &str) {
        self.finish(id, |progress| {
            progress.status = ExtractionStatus::Failed;
            progress.error_kind = Some(kind.to_string());
            progress.error = Some(error.to_string());
        });
    }

    fn finish(&self, id: Uuid, update: impl FnOnce(&mut ExtractionProgress)) {
        if let Some(mut progress) = self.jobs.get_mut(&id) {
            if progress.status.is_finished() {
                return;
            }
            update(progress.value_mut());
            progress.updated_at = Utc::now();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Requests not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        let count = |status: ExtractionStatus| {
            self.jobs.iter().filter(|j| j.status == status).count()
        };

        QueueStats {
            total: self.jobs.len(),
            queued: count(ExtractionStatus::Queued),
            running: count(ExtractionStatus::Running),
            succeeded: count(ExtractionStatus::Succeeded),
            timed_out: count(ExtractionStatus::TimedOut),
            failed: count(ExtractionStatus::Failed),
            worker_count: self.worker_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_tracks_progress() {
        let (queue, mut rx) = ExtractionQueue::new(2, 8);
        let id = queue
            .submit(ExtractionRequest::new("uploads", "a.pdf"))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, id);
        assert_eq!(queue.get(id).unwrap().status, ExtractionStatus::Queued);
        assert_eq!(queue.in_flight(), 1);

        queue.mark_running(id);
        queue.mark_finished(id, ExtractionStatus::Succeeded, "extracted/uploads/a.pdf.txt".into(), 2);
        // finishing twice does not double count
        queue.mark_failed(id, "job_failed", "late");

        let progress = queue.get(id).unwrap();
        assert_eq!(progress.status, ExtractionStatus::Succeeded);
        assert_eq!(progress.pages, 2);
        assert!(progress.error.is_none());
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_rejects_incomplete_and_duplicate_requests() {
        let (queue, _rx) = ExtractionQueue::new(1, 8);
        assert!(matches!(
            queue.submit(ExtractionRequest::new("", "a.pdf")).await,
            Err(Error::MalformedMessage(_))
        ));

        let request = ExtractionRequest::new("b", "a.pdf");
        queue.submit(request.clone()).await.unwrap();
        assert!(queue.submit(request).await.is_err());
        assert_eq!(queue.stats().total, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_submits_accept_one() {
        let (queue, mut rx) = ExtractionQueue::new(1, 64);
        let queue = Arc::new(queue);
        let request = ExtractionRequest::new("b", "a.pdf");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let queue = queue.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move { queue.submit(request).await }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(e, Error::DuplicateVersion(_))),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(rx.recv().await.unwrap().id, request.id);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_identity_follows_location_and_upload_time() {
        let request = ExtractionRequest::new("/uploads/", "reports/q1.pdf");
        let identity = request.identity();

        assert_eq!(identity.base_document_id, "uploads/reports/q1.pdf");
        assert_eq!(identity, request.clone().identity());
        assert_eq!(request.document_name(), "q1.pdf");
    }

    #[tokio::test]
    async fn test_closed_queue_marks_failed() {
        let (queue, rx) = ExtractionQueue::new(1, 8);
        drop(rx);

        let request = ExtractionRequest::new("b", "a.pdf");
        let id = request.id;
        assert!(queue.submit(request).await.is_err());
        assert_eq!(queue.get(id).unwrap().status, ExtractionStatus::Failed);
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_job_spec_uses_request_id_as_token() {
        let request = ExtractionRequest::new("b", "a.pdf");
        let spec = request.job_spec();
        assert_eq!(spec.client_token, Some(request.id.to_string()));
    }
}
