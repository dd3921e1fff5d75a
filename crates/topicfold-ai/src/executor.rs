//! Retrying call executor: one logical inference request, driven to success
//! or terminal failure.
//!
//! Rate limiting is the only retryable signal. The n-th consecutive rate-limit
//! sleeps `base_delay * 2^n` before the next attempt, up to
//! [`RetryPolicy::max_attempts`] attempts in total. Every other fault, and an
//! empty reply, ends the call with a [`Failure`] value; nothing is raised past
//! this boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use topicfold_core::{CallOutcome, Failure, LogSink, NullLog, RowOutcome};
use tracing::{debug, warn};

use crate::client::{CompletionClient, CompletionRequest};

/// Backoff and attempt ceiling for rate-limited calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Unit of the exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Total attempts allowed, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    8
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Sleep after the `rate_limited`-th consecutive rate-limit signal (1-based).
    pub fn delay_for(&self, rate_limited: u32) -> Duration {
        let factor = 1u64.checked_shl(rate_limited).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Wraps a [`CompletionClient`] with rate-limit backoff and failure capture.
///
/// Cheap to share: hold it in an `Arc` and call [`execute`](Self::execute)
/// from as many workers as needed.
pub struct RetryingExecutor {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    log: Arc<dyn LogSink>,
}

impl RetryingExecutor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            log: Arc::new(NullLog),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run log shared with the stages built on this executor.
    pub fn log(&self) -> &dyn LogSink {
        self.log.as_ref()
    }

    /// Issue one attempt and classify the result.
    async fn attempt(&self, request: &CompletionRequest, attempt: u32) -> CallOutcome {
        match self.client.complete(request).await {
            Ok(Some(text)) if !text.trim().is_empty() => CallOutcome::Success(text),
            Ok(_) => CallOutcome::TerminalFailure(Failure::NoResponse),
            Err(e) if e.is_rate_limited() => CallOutcome::RateLimited(attempt),
            Err(e) => CallOutcome::TerminalFailure(Failure::Call(e.to_string())),
        }
    }

    /// Drive one request to completion.
    pub async fn execute(&self, request: &CompletionRequest) -> RowOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(request, attempt).await {
                CallOutcome::Success(text) => return Ok(text),
                CallOutcome::TerminalFailure(failure) => {
                    warn!(attempt, error = %failure, "inference call failed");
                    self.log.append(&format!("{}: {}", Utc::now(), failure.marker()));
                    return Err(failure);
                }
                CallOutcome::RateLimited(attempts) if attempts >= max_attempts => {
                    let failure = Failure::RetriesExhausted { attempts };
                    warn!(attempts, "rate limit retries exhausted");
                    self.log.append(&format!("{}: {}", Utc::now(), failure.marker()));
                    return Err(failure);
                }
                CallOutcome::RateLimited(attempts) => {
                    let delay = self.policy.delay_for(attempts);
                    debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
