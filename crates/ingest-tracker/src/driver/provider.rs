//! OCR job provider interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a provider call can return
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider asked us to slow down; safe to retry after a delay
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// The provider refused the request
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The provider could not be reached or answered garbage
    #[error("transport error: {0}")]
    Transport(String),
}

/// What to extract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub bucket: String,
    pub key: String,
    /// Idempotency token so a retried start does not launch a second job
    #[serde(default)]
    pub client_token: Option<String>,
}

impl JobSpec {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            client_token: None,
        }
    }

    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }
}

/// Provider-side job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderJobStatus {
    InProgress,
    Succeeded,
    /// Finished with some pages unreadable; results are usable
    PartialSuccess,
    Failed,
}

/// One unit of extracted text, in provider order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedBlock {
    /// 1-based page number
    pub page: u32,
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Status response, carrying one page of results once the job finished
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusPage {
    pub status: ProviderJobStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub blocks: Vec<ExtractedBlock>,
    #[serde(default)]
    pub next_token: Option<String>,
}

impl JobStatusPage {
    pub fn in_progress() -> Self {
        Self {
            status: ProviderJobStatus::InProgress,
            status_message: None,
            blocks: Vec::new(),
            next_token: None,
        }
    }
}

/// Long-running text extraction service.
///
/// Jobs cannot be cancelled once started.
#[async_trait]
pub trait OcrJobProvider: Send + Sync {
    /// Submit a job, returning the provider's job id
    async fn start_job(&self, spec: &JobSpec) -> Result<String, ProviderError>;

    /// Job status plus the result page addressed by `next_token`
    async fn get_job(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<JobStatusPage, ProviderError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
