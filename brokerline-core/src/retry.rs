//! Retry policy, backoff computation, and the sleep seam used between attempts.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// How a resource call reacts to transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// When false every call behaves as if `max_retries` were zero.
    pub enabled: bool,

    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for every retry after it.
    pub base_delay: Duration,

    /// Soft budget for retrying. Half of it caps any single delay; the
    /// cumulative time spent across attempts is not tracked.
    pub max_total_retry_time: Duration,

    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            max_total_retry_time: Duration::from_millis(30_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Retries available to a call, taking the per-call opt-out into account.
    pub fn effective_retries(&self, skip_retry: bool) -> u32 {
        if self.enabled && !skip_retry {
            self.max_retries
        } else {
            0
        }
    }

    /// Largest delay any single wait may reach.
    pub fn max_delay(&self) -> Duration {
        self.max_total_retry_time / 2
    }

    /// Exponential backoff with random jitter for the given retry number.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
        };
        self.backoff_delay_with_jitter(attempt, jitter)
    }

    /// `min(base_delay * 2^attempt + jitter, max_total_retry_time / 2)`.
    pub fn backoff_delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exponential.saturating_add(jitter).min(self.max_delay())
    }
}

/// Read a `Retry-After` header expressed in whole seconds.
///
/// HTTP-date values and garbage yield `None` so the caller falls back to
/// computed backoff.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
