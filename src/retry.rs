//! Retry controller: bounded delivery of one payload through gateway + validator.
//!
//! Every fault (transport error, undecodable body, malformed batch) is retried
//! within the same attempt budget. After exhaustion the caller sees
//! `ServiceUnavailable` and nothing else.
//!
//! ## Cancellation
//!
//! A [`CallContext`] may carry a deadline and a cancellation signal. Both are
//! checked between attempts; an in-flight request is never interrupted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use protection_types::{Operation, ResultItem};
use serde_json::Value;
use tokio::sync::watch;

use crate::config::RetryConfig;
use crate::error::{ProtectionError, Result};
use crate::gateway::ProtectionGateway;
use crate::validator::validate_batch;

/// Caller-supplied limits for one top-level call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Abort once `true` is sent on the paired `watch::Sender`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// `Err(Cancelled)` when the deadline passed or cancellation was signalled.
    pub fn check(&self) -> Result<()> {
        if let Some(cancel) = &self.cancel {
            if *cancel.borrow() {
                return Err(ProtectionError::Cancelled {
                    reason: "cancelled by caller".into(),
                });
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ProtectionError::Cancelled {
                    reason: "deadline exceeded".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct RetryController {
    gateway: Arc<dyn ProtectionGateway>,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryController {
    pub fn new(gateway: Arc<dyn ProtectionGateway>, config: &RetryConfig) -> Self {
        Self {
            gateway,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deliver `payload` and return the cleaned result items.
    pub async fn deliver(
        &self,
        operation: Operation,
        payload: &[Value],
        ctx: &CallContext,
    ) -> Result<Vec<ResultItem>> {
        let started = Instant::now();
        let mut last_failure = String::new();

        for attempt in 1..=self.max_attempts {
            ctx.check()?;

            match self.gateway.send(operation, payload).await {
                Ok(response) => {
                    let validation = validate_batch(response);
                    if !validation.needs_retry {
                        tracing::debug!(
                            %operation,
                            attempts = attempt,
                            items = validation.items.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "protected call complete"
                        );
                        return Ok(validation.items);
                    }
                    last_failure = "malformed batch response".to_string();
                    tracing::warn!(
                        %operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        "tokenization service returned a malformed batch"
                    );
                }
                Err(e) => {
                    last_failure = e.to_string();
                    tracing::error!(
                        %operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "tokenization service call failed"
                    );
                }
            }

            if attempt < self.max_attempts && !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff).await;
            }
        }

        tracing::error!(
            %operation,
            attempts = self.max_attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            reason = %last_failure,
            "Unable to get a valid response from the tokenization service"
        );
        Err(ProtectionError::ServiceUnavailable {
            attempts: self.max_attempts,
            reason: last_failure,
        })
    }
}
