use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::EventSourcingError;

// ============================================================================
// Conflict Re-run
// ============================================================================
//
// The store never retries. A caller that loses an optimistic-concurrency
// race reloads and re-runs the whole command; this helper does that with a
// growing pause between attempts and stops at the first permanent error.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    /// Short pauses: a conflicting writer usually finishes within milliseconds
    pub fn for_conflicts() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.multiplier).min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Still transient after `max_attempts`
    Failed(E),
    /// Not worth re-running
    PermanentFailure(E),
}

/// Errors a command may be re-run after.
pub trait IsTransient {
    fn is_transient(&self) -> bool;

    /// The version conflict behind this error, if there is one.
    fn conflict(&self) -> Option<&EventSourcingError> {
        None
    }
}

/// Re-run `command` while it fails with a transient error.
///
/// `command` receives the attempt number, starting at 1.
pub async fn retry_on_transient<F, Fut, T, E>(config: RetryConfig, mut command: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        let error = match command(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "✅ Command succeeded after re-run");
                }
                return RetryResult::Success(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            tracing::error!(attempt, error = %error, "Command failed permanently, not re-running");
            return RetryResult::PermanentFailure(error);
        }

        if attempt >= config.max_attempts {
            tracing::error!(attempt, error = %error, "Command still conflicting, giving up");
            return RetryResult::Failed(error);
        }

        match error.conflict() {
            Some(EventSourcingError::ConcurrencyConflict {
                stream_id,
                expected_version,
                actual_version,
            }) => tracing::warn!(
                attempt,
                stream_id = %stream_id,
                expected_version,
                actual_version,
                delay_ms = delay.as_millis() as u64,
                "⚠️ Stream moved on, reloading and re-running command"
            ),
            _ => tracing::warn!(
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, re-running command"
            ),
        }

        sleep(delay).await;
        delay = config.next_delay(delay);
        attempt += 1;
    }
}
