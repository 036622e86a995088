// ABOUTME: Retry policy and bounded retry loop for single task executions
// ABOUTME: Supports fixed delays and exponential backoff between attempts

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::result::TaskResult;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Run once, no retries
    pub fn single() -> Self {
        Self::fixed_delay(1, Duration::ZERO)
    }

    pub fn fixed_delay(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            backoff_multiplier: 1.0,
            max_delay: delay,
        }
    }

    pub fn exponential_backoff(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier: multiplier,
            max_delay: Duration::from_secs(300),
        }
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32)) as u64;

        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Run `attempt_fn` until it yields a success or the policy is exhausted.
/// The closure receives the 1-based attempt number. On exhaustion a
/// synthetic error result names the task and the attempt count.
pub async fn execute_with_retries<F, Fut>(
    task_id: &str,
    policy: &RetryPolicy,
    mut attempt_fn: F,
) -> TaskResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TaskResult>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if max_attempts > 1 {
            info!(
                "Executing task {} (attempt {}/{})",
                task_id, attempt, max_attempts
            );
        }

        let mut result = attempt_fn(attempt).await;
        if result.is_success() {
            debug!("Task {} succeeded on attempt {}", task_id, attempt);
            result.add_metadata("attempts", attempt);
            return result;
        }

        warn!(
            "Task {} failed on attempt {}: {}",
            task_id,
            attempt,
            result.message.as_deref().unwrap_or("no message")
        );

        if max_attempts == 1 {
            result.add_metadata("attempts", attempt);
            return result;
        }
        last_error = result.message;

        if attempt < max_attempts {
            let delay = policy.calculate_delay(attempt - 1);
            if !delay.is_zero() {
                debug!("Waiting {:?} before retry", delay);
                sleep(delay).await;
            }
        }
    }

    error!("Task {} failed after {} attempts", task_id, max_attempts);
    let mut result = TaskResult::error(format!(
        "Task {} failed after {} attempts",
        task_id, max_attempts
    ))
    .with_metadata("attempts", max_attempts);
    if let Some(message) = last_error {
        result.add_metadata("last_error", message);
    }
    result
}
