//! Retry-with-backoff combinator
//!
//! Every polling loop in the pipeline (health gate, hot reload) goes through
//! [`retry`], parameterized by a [`RetryPolicy`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::serde_utils::{duration_secs, opt_duration_secs};

/// Attempt count, interval and per-attempt timeout for a retry loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "duration_secs")]
    pub interval: Duration,

    /// Deadline for each individual attempt
    #[serde(with = "opt_duration_secs")]
    pub attempt_timeout: Option<Duration>,

    /// Interval multiplier; 1.0 keeps a fixed delay
    pub multiplier: f64,

    /// Upper bound on the delay between attempts
    #[serde(with = "duration_secs")]
    pub max_interval: Duration,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts, no jitter
    pub fn fixed(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            attempt_timeout: None,
            multiplier: 1.0,
            max_interval: interval,
            jitter: 0.0,
        }
    }

    /// Bound each attempt by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Grow the delay by `multiplier` after each failure, capped at `max`
    pub fn with_backoff(mut self, multiplier: f64, max: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_interval = max;
        self
    }

    /// Override the attempt count
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Reject values the delay schedule cannot use
    pub fn check(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be a finite number >= 1.0, got {}", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be between 0.0 and 1.0, got {}", self.jitter));
        }
        Ok(())
    }

    /// Delay schedule for this policy
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.interval,
            self.max_interval.max(self.interval),
            self.multiplier,
            self.jitter,
        )
    }
}

/// Delay schedule with optional growth and jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Backoff {
    /// Out-of-range factors are clamped: `multiplier` to at least 1.0 and
    /// `jitter` to `0.0..=1.0`; NaN falls back to no growth and no jitter.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        let multiplier = if multiplier.is_nan() { 1.0 } else { multiplier.max(1.0) };
        let jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Get the next delay and advance the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);

        if self.jitter > 0.0 {
            let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
            delay + Duration::try_from_secs_f64(jitter_amount).unwrap_or_default()
        } else {
            delay
        }
    }
}

/// Why a single attempt failed
#[derive(Debug, Error)]
pub enum AttemptFailure<E> {
    #[error("{0}")]
    Failed(E),
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

/// All attempts failed
#[derive(Debug, Error)]
#[error("{label}: gave up after {attempts} attempt(s): {last}")]
pub struct Exhausted<E: fmt::Display + fmt::Debug> {
    pub label: String,
    pub attempts: u32,
    pub last: AttemptFailure<E>,
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. Each attempt is bounded by
/// `policy.attempt_timeout` when set; a timed-out attempt counts as a failure.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: fmt::Display + fmt::Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.backoff();
    let mut last = None;

    for attempt in 1..=attempts {
        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(result) => result.map_err(AttemptFailure::Failed),
                Err(_) => Err(AttemptFailure::TimedOut(limit)),
            },
            None => op(attempt).await.map_err(AttemptFailure::Failed),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(failure) => {
                tracing::debug!(label, attempt, attempts, "attempt failed: {}", failure);
                last = Some(failure);
                if attempt < attempts {
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    Err(Exhausted {
        label: label.to_string(),
        attempts,
        last: last.unwrap_or(AttemptFailure::TimedOut(Duration::ZERO)),
    })
}
