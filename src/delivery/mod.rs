//! Retrying publish primitive.
//!
//! A publish is attempted once, then retried up to `max_retries` more times
//! with a linear backoff of `step * attempt` between attempts.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
mod tests;

/// Narrow publish interface to the message broker.
///
/// Implementations must be safe to call from many device tasks at once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one JSON payload to `queue`.
    async fn send(&self, queue: &str, payload: &[u8]) -> Result<()>;
}

/// Retry budget and backoff step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Base unit of the linear backoff.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Backoff schedule for one publish.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            attempt: 0,
            max_retries: self.max_retries,
            step: self.step,
        }
    }
}

/// Retry state for a single publish: attempts used so far and the wait
/// before the next one.
#[derive(Clone, Debug)]
pub struct Backoff {
    attempt: u32,
    max_retries: u32,
    step: Duration,
}

impl Backoff {
    /// Attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt and return the wait before retrying, or `None`
    /// once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt > self.max_retries {
            return None;
        }
        Some(self.step.saturating_mul(self.attempt))
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.next_delay()
    }
}

/// Terminal delivery failure.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    RetriesExhausted {
        queue: String,
        attempts: u32,
        last_error: String,
    },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::RetriesExhausted {
                queue,
                attempts,
                last_error,
            } => write!(
                f,
                "publish retries exhausted for queue '{}' after {} attempts: {}",
                queue, attempts, last_error
            ),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Publish `payload` to `queue`, retrying with linear backoff.
///
/// Returns the number of attempts it took on success.
pub async fn publish_with_retry(
    transport: &dyn Transport,
    queue: &str,
    payload: &[u8],
    policy: RetryPolicy,
) -> Result<u32, DeliveryError> {
    let mut backoff = policy.backoff();

    loop {
        let error = match transport.send(queue, payload).await {
            Ok(()) => return Ok(backoff.attempts() + 1),
            Err(e) => e,
        };

        match backoff.next_delay() {
            Some(delay) => {
                debug!(
                    queue = %queue,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Publish failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                return Err(DeliveryError::RetriesExhausted {
                    queue: queue.to_string(),
                    attempts: backoff.attempts(),
                    last_error: format!("{:#}", error),
                });
            }
        }
    }
}
