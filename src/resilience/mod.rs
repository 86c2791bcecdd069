//! Rate limiting, retries, and cancellation for GitLab fetches.

use crate::config::{RateLimitConfig, RetryConfig};
use crate::errors::{GitLabError, GitLabResult};
use reqwest::header::HeaderMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Header carrying the remaining request budget.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "ratelimit-remaining";

/// Header carrying the upstream's suggested wait after a 429.
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Longest `Retry-After` the client will honor, in seconds.
pub const MAX_RETRY_AFTER_SECS: u64 = 60 * 60;

const UNKNOWN_REMAINING: u64 = u64::MAX;

/// Cancellation signal and optional deadline observed at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl FetchContext {
    /// Creates a context that is never cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes the given cancellation token.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Fails operations still running at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fails operations still running after `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Gets the cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Gets the deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the caller cancelled or the deadline passed.
    pub fn check(&self) -> GitLabResult<()> {
        if self.token.is_cancelled() {
            return Err(GitLabError::cancelled("Operation cancelled by caller"));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(GitLabError::cancelled("Operation deadline elapsed"));
            }
        }
        Ok(())
    }

    /// Runs `fut` unless the caller cancels or the deadline passes first.
    pub async fn guard<F: Future>(&self, fut: F) -> GitLabResult<F::Output> {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                Err(GitLabError::cancelled("Operation cancelled by caller"))
            }
            _ = deadline => Err(GitLabError::cancelled("Operation deadline elapsed")),
            out = fut => Ok(out),
        }
    }

    /// Sleeps for `duration`, waking early on cancellation.
    pub async fn sleep(&self, duration: Duration) -> GitLabResult<()> {
        self.guard(sleep(duration)).await
    }
}

/// Shared rate-limit state for one upstream host.
///
/// Every fetch of a client holds the same controller. A 429 seen by one fetch
/// sets a cooldown that all fetches wait out before their next request.
#[derive(Debug)]
pub struct RateLimitController {
    cooldown: Duration,
    honor_retry_after: bool,
    max_retries: Option<u32>,
    cooldown_until: RwLock<Option<Instant>>,
    remaining: AtomicU64,
    permits: Semaphore,
}

impl RateLimitController {
    /// Creates a controller from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            cooldown: config.cooldown,
            honor_retry_after: config.honor_retry_after,
            max_retries: config.max_retries,
            cooldown_until: RwLock::new(None),
            remaining: AtomicU64::new(UNKNOWN_REMAINING),
            permits: Semaphore::new(config.max_concurrent_requests.max(1)),
        }
    }

    /// Retry ceiling for consecutive 429s, if any.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Last remaining budget reported by the upstream.
    pub fn remaining(&self) -> Option<u32> {
        match self.remaining.load(Ordering::SeqCst) {
            UNKNOWN_REMAINING => None,
            n => Some(n as u32),
        }
    }

    /// Time left in the current cooldown.
    pub async fn cooldown_remaining(&self) -> Option<Duration> {
        let until = (*self.cooldown_until.read().await)?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Waits out any cooldown and takes an in-flight request permit.
    pub async fn acquire(&self, ctx: &FetchContext) -> GitLabResult<SemaphorePermit<'_>> {
        loop {
            if let Some(wait) = self.cooldown_remaining().await {
                tracing::debug!(
                    wait_ms = wait.as_millis() as u64,
                    "Waiting for rate-limit cooldown"
                );
                ctx.sleep(wait).await?;
                continue;
            }

            let permit = ctx
                .guard(self.permits.acquire())
                .await?
                .map_err(|_| GitLabError::cancelled("Rate limit controller closed"))?;

            // Another fetch may have been throttled while this one queued.
            if self.cooldown_remaining().await.is_some() {
                drop(permit);
                continue;
            }

            return Ok(permit);
        }
    }

    /// Records a 429 and returns how long fetches will pause.
    pub async fn record_rate_limited(&self, retry_after: Option<Duration>) -> Duration {
        let wait = match retry_after {
            Some(upstream) if self.honor_retry_after => upstream,
            _ => self.cooldown,
        };

        let (wait, until) = match Instant::now().checked_add(wait) {
            Some(until) => (wait, until),
            None => (self.cooldown, Instant::now() + self.cooldown),
        };
        let mut current = self.cooldown_until.write().await;
        match *current {
            Some(existing) if existing >= until => {}
            _ => *current = Some(until),
        }
        self.remaining.store(0, Ordering::SeqCst);

        tracing::warn!(
            cooldown_ms = wait.as_millis() as u64,
            "Rate limit exceeded, pausing requests to host"
        );

        wait
    }

    /// Updates the remaining budget from response headers.
    pub fn observe(&self, headers: &HeaderMap) {
        if let Some(remaining) = headers
            .get(RATE_LIMIT_REMAINING_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok())
        {
            self.remaining.store(remaining as u64, Ordering::SeqCst);
        }
    }
}

/// Parses a `Retry-After` header given in seconds.
///
/// Values above [`MAX_RETRY_AFTER_SECS`] are clamped to it.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

/// Retry executor with exponential backoff for timeouts and connection failures.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
        }
    }

    /// Creates a retry executor from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_backoff,
            config.max_backoff,
            config.multiplier,
            config.jitter,
        )
    }

    /// Executes an operation, retrying retryable failures.
    ///
    /// Backoff sleeps observe `ctx`, so cancellation interrupts them.
    pub async fn execute<F, Fut, T>(&self, ctx: &FetchContext, mut operation: F) -> GitLabResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GitLabResult<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    let delay = self.calculate_backoff(attempt);

                    tracing::debug!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after error"
                    );

                    ctx.sleep(delay).await?;
                }
            }
        }
    }

    /// Calculates backoff duration for an attempt.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let jitter_range = capped * self.jitter;
        let jitter_value = rand_jitter() * jitter_range * 2.0 - jitter_range;
        let final_delay = (capped + jitter_value).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Simple random jitter (0.0 to 1.0).
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    nanos as f64 / 1_000_000_000.0
}
