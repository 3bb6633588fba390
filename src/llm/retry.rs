//! Resilient invocation of the inference service.
//!
//! One logical call becomes up to `max_attempts` provider calls. Only rate
//! limiting is retried; everything else is returned on first sight. Backoff
//! waits are `tokio::time::sleep`, so they suspend only the calling task and
//! are abandoned when the caller drops the future.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{InvocationError, InvocationErrorKind, LlmError};
use crate::llm::provider::{CompletionRequest, LlmProvider};

/// Backoff configuration for rate-limited calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total provider calls allowed, including the first. Always >= 1.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub base_delay: Duration,
    /// Growth factor applied per further attempt. Always >= 1.0.
    pub backoff_multiplier: f64,
    /// Upper bound on any single wait, jitter included.
    pub max_delay: Duration,
    /// Upper bound on the random extra added to each wait.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(16),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Clamp out-of-range values instead of rejecting them.
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            self.backoff_multiplier = 1.0;
        }
        if self.base_delay > self.max_delay {
            self.max_delay = self.base_delay;
        }
        self
    }

    /// Nominal wait after the given failed attempt (1-based), without jitter.
    ///
    /// `base_delay * backoff_multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let nominal = self.base_delay.as_secs_f64() * factor;
        if !nominal.is_finite() || nominal >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(nominal)
        }
    }
}

/// Retry behaviour for a provider error.
pub fn classify(error: &LlmError) -> InvocationErrorKind {
    match error {
        LlmError::RateLimited { .. } => InvocationErrorKind::RateLimited,
        _ => InvocationErrorKind::Fatal,
    }
}

/// Wraps an `LlmProvider` with rate-limit retries.
#[derive(Clone)]
pub struct ResilientInvoker {
    llm: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl ResilientInvoker {
    pub fn new(llm: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self {
            llm,
            policy: policy.normalized(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Run the request, retrying while the provider reports rate limiting.
    ///
    /// Returns the response text, or the last provider error tagged with how
    /// many attempts were made.
    pub async fn invoke(&self, request: CompletionRequest) -> Result<String, InvocationError> {
        let mut previous_delay = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match self.llm.complete(request.clone()).await {
                Ok(response) => {
                    debug!(
                        attempt,
                        input_tokens = response.input_tokens,
                        output_tokens = response.output_tokens,
                        "Completion succeeded"
                    );
                    if attempt > 1 {
                        info!(attempt, model = %self.llm.model_name(), "Call succeeded after retry");
                    }
                    return Ok(response.content);
                }
                Err(e) => e,
            };

            let kind = classify(&error);
            if kind == InvocationErrorKind::Fatal {
                debug!(attempt, error = %error, "Fatal provider error, not retrying");
                return Err(InvocationError {
                    kind,
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= self.policy.max_attempts {
                warn!(
                    attempts = attempt,
                    model = %self.llm.model_name(),
                    "Still rate limited, giving up"
                );
                return Err(InvocationError {
                    kind,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.next_delay(attempt, previous_delay, retry_after(&error));
            previous_delay = delay;

            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Wait before the next attempt: nominal backoff plus jitter, raised to
    /// any provider hint, never below the previous wait, capped at `max_delay`.
    fn next_delay(
        &self,
        attempt: u32,
        previous: Duration,
        hint: Option<Duration>,
    ) -> Duration {
        let mut delay = self.policy.backoff_delay(attempt) + jitter(self.policy.jitter);
        if let Some(hint) = hint {
            delay = delay.max(hint);
        }
        delay.max(previous).min(self.policy.max_delay)
    }
}

fn retry_after(error: &LlmError) -> Option<Duration> {
    match error {
        LlmError::RateLimited { retry_after, .. } => *retry_after,
        _ => None,
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
