//! Resilient driver for asynchronous text extraction jobs

mod backoff;
mod job_driver;
mod provider;

pub use backoff::{BackoffPolicy, RetryError, Sleeper, TokioSleeper};
pub use job_driver::{
    DriverError, JobDriver, JobOutcome, JobResult, JobRun, JobState, TimedOutJob,
};
pub use provider::{
    ExtractedBlock, JobSpec, JobStatusPage, OcrJobProvider, ProviderError, ProviderJobStatus,
};
