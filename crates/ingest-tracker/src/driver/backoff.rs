//! Exponential backoff with jitter for rate-limited provider calls

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::provider::ProviderError;
use crate::config::DriverConfig;

/// Suspension point used for backoff and poll waits
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a retried call gave up
#[derive(Debug, Clone)]
pub enum RetryError {
    /// Still rate limited after the last allowed attempt
    Exhausted { attempts: u32, last_error: String },
    /// Non rate-limit error; not retried
    Fatal(ProviderError),
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last_error } => {
                write!(f, "still rate limited after {} attempts: {}", attempts, last_error)
            }
            RetryError::Fatal(err) => write!(f, "{}", err),
        }
    }
}

/// Backoff curve `min(base * 2^attempt, cap) + jitter` with an attempt ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the uniformly drawn jitter
    pub jitter: Duration,
    /// Total attempts, including the first one
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Policy for submitting a job
    pub fn for_start(config: &DriverConfig) -> Self {
        Self::with_attempts(config, config.start_max_attempts)
    }

    /// Policy for status polls and result page fetches
    pub fn for_poll(config: &DriverConfig) -> Self {
        Self::with_attempts(config, config.poll_max_attempts)
    }

    fn with_attempts(config: &DriverConfig, max_attempts: u32) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            cap: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Capped exponential delay for a zero-based attempt, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }

    /// Delay before retrying after `attempt` failed. Jitter is drawn anew
    /// on every call.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }

    /// Run `operation` until it succeeds, backing off on rate-limit errors.
    ///
    /// `waits` is incremented once per backoff sleep.
    pub async fn retry<T, F, Fut>(
        &self,
        operation: &str,
        sleeper: &dyn Sleeper,
        waits: &mut u32,
        mut call: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(ProviderError::RateLimited(message)) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            "{}: rate limited on final attempt {}/{}",
                            operation,
                            attempt,
                            self.max_attempts
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: message,
                        });
                    }

                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        "{}: rate limited (attempt {}/{}), retrying in {:?}",
                        operation,
                        attempt,
                        self.max_attempts,
                        delay
                    );
                    sleeper.sleep(delay).await;
                    *waits += 1;
                }
                Err(other) => return Err(RetryError::Fatal(other)),
            }
        }
    }
}
