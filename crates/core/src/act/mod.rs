//! ACT: executes selected proposals against the action registry.
//!
//! Every proposal yields exactly one [`ActionResult`]. Failures are values, never
//! errors: unknown actions, handler failures, timeouts and cancellations all come
//! back as outcomes.

pub mod builtins;
pub mod registry;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

pub use registry::{handler_fn, ActionDef, ActionHandler, ActionRegistry, ActionRegistryBuilder};

use crate::ego::SelectedProposal;
use crate::errors::HandlerError;
use crate::id::Proposal;
use crate::value::Value;

pub const CANCELLED_MESSAGE: &str = "Cancelled due to previous error";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActConfig {
    /// Applied to actions registered without their own timeout.
    pub default_timeout: Duration,
    /// Once a result is not a success, skip the rest of the batch.
    pub cancel_on_error: bool,
    /// Delay after failed attempt `k` is `backoff_base × 2^k`.
    pub backoff_base: Duration,
}

impl Default for ActConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(5000),
            cancel_on_error: false,
            backoff_base: Duration::from_millis(100),
        }
    }
}

/// Where backoff delays are spent.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    requested: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn requested(&self) -> Vec<Duration> {
        self.requested.lock().map(|requested| requested.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(duration);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    RetryableError,
    FatalError,
    Timeout,
    Cancelled,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableError => "retryable_error",
            Self::FatalError => "fatal_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub outcome: ActionOutcome,
    pub value: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Handler invocations made; zero for unknown and cancelled actions.
    pub attempts: u32,
}

impl ActionResult {
    fn failure(action: &str, outcome: ActionOutcome, error: String, attempts: u32) -> Self {
        Self {
            action: action.to_owned(),
            outcome,
            value: Value::Null,
            error: Some(error),
            duration_ms: 0,
            attempts,
        }
    }

    pub fn cancelled(action: &str) -> Self {
        Self::failure(action, ActionOutcome::Cancelled, CANCELLED_MESSAGE.to_owned(), 0)
    }

    pub fn unknown_action(action: &str) -> Self {
        Self::failure(action, ActionOutcome::FatalError, format!("Unknown action: {action}"), 0)
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    fn finished(mut self, started: Instant) -> Self {
        self.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Runs proposals one at a time with timeout, retry/backoff and cancel-on-error.
#[derive(Clone)]
pub struct Act {
    registry: Arc<ActionRegistry>,
    config: ActConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl Act {
    pub fn new(registry: Arc<ActionRegistry>, config: ActConfig) -> Self {
        Self { registry, config, sleeper: Arc::new(TokioSleeper) }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ActConfig {
        &self.config
    }

    /// Backoff requested after failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config.backoff_base.saturating_mul(factor)
    }

    /// Execute one proposal, retrying non-fatal failures of retryable actions.
    ///
    /// Each attempt is raced against the action's timeout; on expiry the handler
    /// future is dropped and the attempt counts as a `Timeout` failure.
    pub async fn execute_proposal(&self, proposal: &Proposal) -> ActionResult {
        let started = Instant::now();
        let action_name = proposal.action.as_str();

        let Some(action) = self.registry.get(action_name) else {
            warn!(event_name = "act.unknown_action", action = action_name, "unknown action");
            return ActionResult::unknown_action(action_name).finished(started);
        };

        let timeout = action.timeout.unwrap_or(self.config.default_timeout);
        let max_attempts = action.max_attempts();
        let mut attempt = 0_u32;

        loop {
            attempt += 1;

            let (outcome, error) =
                match tokio::time::timeout(timeout, action.handler.call(&proposal.args)).await {
                    Ok(Ok(value)) => {
                        return ActionResult {
                            action: action_name.to_owned(),
                            outcome: ActionOutcome::Success,
                            value,
                            error: None,
                            duration_ms: 0,
                            attempts: attempt,
                        }
                        .finished(started);
                    }
                    Ok(Err(HandlerError::Fatal(message))) => {
                        return ActionResult::failure(
                            action_name,
                            ActionOutcome::FatalError,
                            message,
                            attempt,
                        )
                        .finished(started);
                    }
                    Ok(Err(HandlerError::Retryable(message))) => {
                        (ActionOutcome::RetryableError, message)
                    }
                    Err(_) => (
                        ActionOutcome::Timeout,
                        format!("Timed out after {}ms", timeout.as_millis()),
                    ),
                };

            if !action.retryable || attempt >= max_attempts {
                return ActionResult::failure(action_name, outcome, error, attempt)
                    .finished(started);
            }

            let delay = self.backoff_delay(attempt);
            debug!(
                event_name = "act.retry_scheduled",
                action = action_name,
                attempt,
                outcome = outcome.as_str(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying action after backoff"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    /// Execute selections sequentially in rank order.
    pub async fn execute_all(&self, selected: &[SelectedProposal]) -> Vec<ActionResult> {
        let mut ordered: Vec<&SelectedProposal> = selected.iter().collect();
        ordered.sort_by_key(|entry| entry.rank);

        let mut results = Vec::with_capacity(ordered.len());
        let mut cancelling = false;

        for entry in ordered {
            if cancelling {
                results.push(ActionResult::cancelled(&entry.proposal.action));
                continue;
            }

            let result = self.execute_proposal(&entry.proposal).await;
            if self.config.cancel_on_error && !result.is_success() {
                warn!(
                    event_name = "act.cancelled",
                    action = %result.action,
                    outcome = result.outcome.as_str(),
                    "cancelling remaining actions after failure"
                );
                cancelling = true;
            }
            results.push(result);
        }

        results
    }
}
