//! Start, poll and drain a long-running extraction job

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::backoff::{BackoffPolicy, RetryError, Sleeper, TokioSleeper};
use super::provider::{ExtractedBlock, JobSpec, OcrJobProvider, ProviderJobStatus};
use crate::config::DriverConfig;

/// Lifecycle of one driven job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Starting,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }
}

/// Driver failures
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("failed to start extraction job after {attempts} attempts: {message}")]
    JobStartFailed { attempts: u32, message: String },

    #[error("extraction job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("status of extraction job {job_id} unavailable: {message}")]
    StatusUnavailable { job_id: String, message: String },
}

impl DriverError {
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::JobStartFailed { .. } => "job_start_failed",
            DriverError::JobFailed { .. } => "job_failed",
            DriverError::StatusUnavailable { .. } => "status_unavailable",
        }
    }
}

/// Counters for one drive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRun {
    pub job_id: Option<String>,
    pub state: JobState,
    pub start_attempts: u32,
    pub poll_rounds: u32,
    /// Backoff sleeps caused by rate limiting
    pub rate_limit_waits: u32,
    pub pages_fetched: u32,
}

impl Default for JobRun {
    fn default() -> Self {
        Self {
            job_id: None,
            state: JobState::NotStarted,
            start_attempts: 0,
            poll_rounds: 0,
            rate_limit_waits: 0,
            pages_fetched: 0,
        }
    }
}

/// Results of a finished job, blocks in provider order
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub blocks: Vec<ExtractedBlock>,
    pub status_message: Option<String>,
    pub run: JobRun,
}

impl JobResult {
    /// Block text grouped by page, pages in first-seen order
    pub fn text_by_page(&self) -> Vec<(u32, String)> {
        let mut pages: Vec<(u32, String)> = Vec::new();
        for block in &self.blocks {
            match pages.last_mut() {
                Some((page, text)) if *page == block.page => {
                    text.push('\n');
                    text.push_str(&block.text);
                }
                _ => pages.push((block.page, block.text.clone())),
            }
        }
        pages
    }

    /// Full document text, pages separated by a blank line
    pub fn full_text(&self) -> String {
        self.text_by_page()
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn page_count(&self) -> usize {
        self.text_by_page().len()
    }
}

/// A job that was still running when the wait budget ran out.
///
/// The provider keeps working on it; results can be fetched later by id.
#[derive(Debug, Clone)]
pub struct TimedOutJob {
    pub job_id: String,
    pub waited: Duration,
    pub run: JobRun,
}

impl TimedOutJob {
    /// Marker text written in place of the missing results
    pub fn placeholder(&self) -> String {
        format!(
            "[extraction pending] job {} was still running after {} poll rounds ({}s). \
             Results remain retrievable from the provider by job id.",
            self.job_id,
            self.run.poll_rounds,
            self.waited.as_secs()
        )
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded(JobResult),
    TimedOut(TimedOutJob),
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Succeeded(result) => &result.job_id,
            JobOutcome::TimedOut(job) => &job.job_id,
        }
    }

    pub fn run(&self) -> &JobRun {
        match self {
            JobOutcome::Succeeded(result) => &result.run,
            JobOutcome::TimedOut(job) => &job.run,
        }
    }

    /// Extracted text, or the placeholder for a timed-out job
    pub fn text(&self) -> String {
        match self {
            JobOutcome::Succeeded(result) => result.full_text(),
            JobOutcome::TimedOut(job) => job.placeholder(),
        }
    }
}

/// Drives jobs on an [`OcrJobProvider`] with backoff on rate limiting
pub struct JobDriver {
    provider: Arc<dyn OcrJobProvider>,
    sleeper: Arc<dyn Sleeper>,
    start_policy: BackoffPolicy,
    poll_policy: BackoffPolicy,
    poll_interval: Duration,
    max_poll_rounds: u32,
}

impl JobDriver {
    pub fn new(provider: Arc<dyn OcrJobProvider>, config: &DriverConfig) -> Self {
        Self::with_sleeper(provider, Arc::new(TokioSleeper), config)
    }

    pub fn with_sleeper(
        provider: Arc<dyn OcrJobProvider>,
        sleeper: Arc<dyn Sleeper>,
        config: &DriverConfig,
    ) -> Self {
        Self {
            provider,
            sleeper,
            start_policy: BackoffPolicy::for_start(config),
            poll_policy: BackoffPolicy::for_poll(config),
            poll_interval: config.poll_interval(),
            max_poll_rounds: config.max_poll_rounds.max(1),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Start the job, poll until it leaves IN_PROGRESS, then drain every
    /// result page.
    pub async fn drive(&self, spec: &JobSpec) -> Result<JobOutcome, DriverError> {
        let mut run = JobRun::default();
        self.drive_with(spec, &mut run).await
    }

    /// Like [`drive`](Self::drive), recording progress into `run` as it goes
    pub async fn drive_with(
        &self,
        spec: &JobSpec,
        run: &mut JobRun,
    ) -> Result<JobOutcome, DriverError> {
        let job_id = self.start(spec, run).await?;

        let started = tokio::time::Instant::now();
        let mut first_page = None;
        for round in 1..=self.max_poll_rounds {
            run.poll_rounds = round;
            let page = self.fetch(&job_id, None, run).await?;

            match page.status {
                ProviderJobStatus::InProgress => {
                    tracing::debug!("Job {} in progress (round {})", job_id, round);
                    if round < self.max_poll_rounds {
                        self.sleeper.sleep(self.poll_interval).await;
                    }
                }
                ProviderJobStatus::Failed => {
                    run.state = JobState::Failed;
                    let message = page
                        .status_message
                        .unwrap_or_else(|| "provider reported failure".to_string());
                    tracing::error!("Job {} failed: {}", job_id, message);
                    return Err(DriverError::JobFailed { job_id, message });
                }
                ProviderJobStatus::Succeeded | ProviderJobStatus::PartialSuccess => {
                    if page.status == ProviderJobStatus::PartialSuccess {
                        tracing::warn!(
                            "Job {} finished with partial success: {}",
                            job_id,
                            page.status_message.as_deref().unwrap_or("")
                        );
                    }
                    first_page = Some(page);
                    break;
                }
            }
        }

        let Some(first_page) = first_page else {
            run.state = JobState::TimedOut;
            let waited = self.poll_interval * self.max_poll_rounds.saturating_sub(1);
            tracing::warn!(
                "Job {} still running after {} rounds ({:?} elapsed)",
                job_id,
                run.poll_rounds,
                started.elapsed()
            );
            return Ok(JobOutcome::TimedOut(TimedOutJob {
                job_id,
                waited,
                run: run.clone(),
            }));
        };

        let status_message = first_page.status_message.clone();
        let blocks = self.drain(&job_id, first_page, run).await?;
        run.state = JobState::Succeeded;

        tracing::info!(
            "Job {} succeeded: {} blocks over {} result pages",
            job_id,
            blocks.len(),
            run.pages_fetched
        );

        Ok(JobOutcome::Succeeded(JobResult {
            job_id,
            blocks,
            status_message,
            run: run.clone(),
        }))
    }

    async fn start(&self, spec: &JobSpec, run: &mut JobRun) -> Result<String, DriverError> {
        run.state = JobState::Starting;
        let provider = self.provider.clone();
        let mut attempts = 0u32;
        let mut waits = 0u32;

        let started = self
            .start_policy
            .retry("start_job", self.sleeper.as_ref(), &mut waits, || {
                attempts += 1;
                let provider = provider.clone();
                async move { provider.start_job(spec).await }
            })
            .await;

        run.start_attempts = attempts;
        run.rate_limit_waits += waits;

        match started {
            Ok(job_id) => {
                tracing::info!(
                    "Started {} job {} for {}/{}",
                    self.provider.name(),
                    job_id,
                    spec.bucket,
                    spec.key
                );
                run.job_id = Some(job_id.clone());
                run.state = JobState::Polling;
                Ok(job_id)
            }
            Err(err) => {
                run.state = JobState::Failed;
                Err(DriverError::JobStartFailed {
                    attempts,
                    message: err.to_string(),
                })
            }
        }
    }

    async fn fetch(
        &self,
        job_id: &str,
        next_token: Option<&str>,
        run: &mut JobRun,
    ) -> Result<super::provider::JobStatusPage, DriverError> {
        let provider = self.provider.clone();
        let mut waits = 0u32;

        let page = self
            .poll_policy
            .retry("get_job", self.sleeper.as_ref(), &mut waits, || {
                let provider = provider.clone();
                async move { provider.get_job(job_id, next_token).await }
            })
            .await;

        run.rate_limit_waits += waits;
        page.map_err(|err| {
            run.state = JobState::Failed;
            status_unavailable(job_id, err)
        })
    }

    async fn drain(
        &self,
        job_id: &str,
        first_page: super::provider::JobStatusPage,
        run: &mut JobRun,
    ) -> Result<Vec<ExtractedBlock>, DriverError> {
        let mut blocks = first_page.blocks;
        run.pages_fetched = 1;
        let mut next_token = first_page.next_token;

        while let Some(token) = next_token.take() {
            let page = self.fetch(job_id, Some(&token), run).await?;
            run.pages_fetched += 1;
            blocks.extend(page.blocks);

            if page.next_token.as_deref() == Some(token.as_str()) {
                run.state = JobState::Failed;
                return Err(DriverError::StatusUnavailable {
                    job_id: job_id.to_string(),
                    message: format!("provider repeated page token {}", token),
                });
            }
            next_token = page.next_token;
        }

        Ok(blocks)
    }
}

fn status_unavailable(job_id: &str, err: RetryError) -> DriverError {
    DriverError::StatusUnavailable {
        job_id: job_id.to_string(),
        message: err.to_string(),
    }
}
