//! Reconnect policy and the timer seam it sleeps through.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bounded retry policy for the live channel.
///
/// `backoff_factor = 1.0` gives a fixed delay; larger factors grow the delay
/// per attempt up to `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 3_000,
            backoff_factor: 1.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            backoff_factor: 1.0,
            max_delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.delay_ms as f64 * factor.powi(exponent);
        let capped = scaled.min(self.max_delay_ms.max(self.delay_ms) as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Attempt counter for one tracked task.
///
/// Only a new task (a new [`RetryBudget`]) resets the count; successful
/// reconnects do not.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Claim the next attempt. Returns its number and delay, or `None` once
    /// the ceiling is reached.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.policy.delay_for(self.attempts)))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Timer abstraction so retry and polling loops run without real time in tests.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
