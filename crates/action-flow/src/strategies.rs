//! Failure handling strategies

use async_trait::async_trait;
use optics_locator::ActionError;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::errors::FlowError;

/// Upper bound on the delay between two attempts of one keyword.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Failure handler trait
#[async_trait]
pub trait FailureHandler: Send + Sync {
    /// Decide what happens to a keyword whose attempt `attempt` (1-based)
    /// out of `max_attempts` just failed.
    async fn handle_failure(
        &self,
        node_id: &str,
        error: &ActionError,
        attempt: u32,
        max_attempts: u32,
    ) -> FailureDecision;

    /// Check if retry should be attempted
    fn should_retry(&self, error: &ActionError, attempt: u32, max_attempts: u32) -> bool;

    /// Calculate backoff duration for retry
    fn calculate_backoff(&self, attempt: u32) -> Duration;
}

/// Result of failure handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Run the keyword again after `backoff`
    Retry { backoff: Duration },

    /// The attempt budget is spent; the node ends COMPLETED_FAILED
    Fail(String),

    /// The failure is not worth retrying; the node ends in ERROR
    Abort(String),
}

/// Retries retryable failures until the budget runs out, with exponential
/// backoff from `base_backoff`.
#[derive(Debug, Clone, Default)]
pub struct DefaultFailureHandler {
    base_backoff: Duration,
}

impl DefaultFailureHandler {
    pub fn new(base_backoff: Duration) -> Self {
        Self { base_backoff }
    }
}

#[async_trait]
impl FailureHandler for DefaultFailureHandler {
    async fn handle_failure(
        &self,
        node_id: &str,
        error: &ActionError,
        attempt: u32,
        max_attempts: u32,
    ) -> FailureDecision {
        if !error.is_retryable() {
            warn!(node_id, attempt, "keyword failed with a non-retryable error: {error}");
            return FailureDecision::Abort(error.to_string());
        }

        if self.should_retry(error, attempt, max_attempts) {
            let backoff = self.calculate_backoff(attempt);
            info!(
                node_id,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "keyword failed, retrying: {error}"
            );
            return FailureDecision::Retry { backoff };
        }

        warn!(node_id, attempt, "keyword failed after {attempt} attempt(s): {error}");
        let exceeded = FlowError::RetryBudgetExceeded {
            node: node_id.to_string(),
            attempts: attempt,
            last: error.to_string(),
        };
        FailureDecision::Fail(exceeded.to_string())
    }

    fn should_retry(&self, error: &ActionError, attempt: u32, max_attempts: u32) -> bool {
        error.is_retryable() && attempt < max_attempts
    }

    fn calculate_backoff(&self, attempt: u32) -> Duration {
        // base * 2^(attempt-1)
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(multiplier).min(MAX_BACKOFF)
    }
}
