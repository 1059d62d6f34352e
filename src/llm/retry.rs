use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Randomized exponential backoff with an attempt ceiling.
///
/// The wait before attempt `n + 1` is drawn uniformly from
/// `[min_wait, clamp(multiplier * 2^(n - 1), min_wait, max_wait)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub multiplier: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Policy for chat-completion calls: 2s to 60s window, 12 attempts.
    pub const fn completion() -> Self {
        Self {
            multiplier: Duration::from_secs(1),
            min_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
            max_attempts: 12,
        }
    }

    /// Policy for groundedness scoring: 20s to 60s window, 12 attempts.
    pub const fn groundedness() -> Self {
        Self {
            multiplier: Duration::from_secs(1),
            min_wait: Duration::from_secs(20),
            max_wait: Duration::from_secs(60),
            max_attempts: 12,
        }
    }

    /// Retries without waiting. Useful when a caller owns its own pacing.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            multiplier: Duration::ZERO,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
            max_attempts,
        }
    }

    /// Bounds of the wait that follows the `attempt`-th failed attempt (1-based).
    pub fn backoff_window(&self, attempt: u32) -> (Duration, Duration) {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let exponential = self.multiplier.checked_mul(factor).unwrap_or(self.max_wait);
        let high = exponential.min(self.max_wait).max(self.min_wait);
        (self.min_wait, high)
    }

    fn next_wait(&self, attempt: u32) -> Duration {
        let (low, high) = self.backoff_window(attempt);
        if high <= low {
            return low;
        }
        let secs = rand::thread_rng().gen_range(low.as_secs_f64()..=high.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Runs `call` until it succeeds, fails permanently, or the policy runs out
/// of attempts. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient() || attempt >= max_attempts {
                    return Err(err);
                }

                let wait = policy.next_wait(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
