//! Per-step retry policy and the retry loop.
//!
//! ## Retry Strategy
//!
//! A failed attempt is retried after `initial_delay`, up to `max_attempts`
//! attempts in total (the first call included). The delay is constant unless
//! `backoff_coefficient` is raised above 1.0, in which case retry `n` waits
//! `initial_delay * coefficient^(n-1)`. With the defaults (5 s, 3 attempts)
//! a step that never succeeds gives up after ~10 s of waiting.
//!
//! Both suspension points (the step call and the delay) race against the
//! instance's cancellation signal, so a cancelled instance stops without
//! burning its remaining attempts.

use crate::engine::state::StepInvocation;
use crate::error::{StepError, StepFailure};
use crate::progress::WorkflowObserver;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

/// Upper bound for a backed-off retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// How often and how patiently a step is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Wait before the first retry. Default: 5 s.
    pub initial_delay: Duration,
    /// Total attempts including the first. Default: 3. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Growth factor between consecutive delays. Default: 1.0 (constant).
    pub backoff_coefficient: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5000),
            max_attempts: 3,
            backoff_coefficient: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts: max_attempts.max(1),
            backoff_coefficient: 1.0,
        }
    }

    /// Enable exponential backoff. Coefficients below 1.0 are raised to 1.0.
    pub fn with_backoff(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = if coefficient.is_finite() {
            coefficient.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Delay before retry number `retry` (1-indexed). Backoff growth is capped
    /// at [`MAX_RETRY_DELAY`].
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry <= 1 || self.backoff_coefficient <= 1.0 {
            return self.initial_delay;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Resolves once `rx` reports `true`. Never resolves if the sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

/// Run `attempt_fn` under `policy`.
///
/// Returns the step output and the number of attempts it took, or the
/// [`StepFailure`] that ends the instance.
pub async fn run_with_retry<F, Fut>(
    instance: Uuid,
    step: &str,
    input: &Value,
    policy: &RetryPolicy,
    cancel: &mut watch::Receiver<bool>,
    observer: &dyn WorkflowObserver,
    mut attempt_fn: F,
) -> Result<(Value, u32), StepFailure>
where
    F: FnMut(Value) -> Fut,
    Fut: Future<Output = Result<Value, StepError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    if *cancel.borrow() {
        return Err(StepFailure::Cancelled { attempts: 0 });
    }

    loop {
        attempt += 1;
        let invocation = StepInvocation {
            instance,
            step,
            attempt,
            input,
            policy,
        };
        observer.on_step_start(&invocation);

        let result = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(StepFailure::Cancelled { attempts: attempt }),
            r = attempt_fn(input.clone()) => r,
        };

        let err = match result {
            Ok(output) => return Ok((output, attempt)),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(
                "Instance {}: step '{}' failed on final attempt {}/{}: {}",
                instance, step, attempt, max_attempts, err
            );
            return Err(StepFailure::RetryExhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "Instance {}: step '{}' attempt {}/{} failed: {}; retrying in {}ms",
            instance,
            step,
            attempt,
            max_attempts,
            err,
            delay.as_millis()
        );
        observer.on_step_retry(&invocation, &err, delay);

        tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(StepFailure::Cancelled { attempts: attempt }),
            _ = sleep(delay) => {}
        }
    }
}
