//! Retry policy applied after a full pass over the sentinels fails

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::utils::ResolveError;

/// Decides how long to wait before the next resolution pass
///
/// `attempt` starts at 1 and grows by one per exhausted pass. `None`
/// disables further retries.
pub trait RetryStrategy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

impl<F> RetryStrategy for F
where
    F: Fn(u32) -> Option<Duration> + Send + Sync,
{
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self(attempt)
    }
}

/// 10ms per attempt, capped at one second
pub fn default_retry_strategy(attempt: u32) -> Option<Duration> {
    Some(Duration::from_millis(u64::from(attempt).saturating_mul(10).min(1000)))
}

/// Retry bookkeeping for one connect leg
#[derive(Debug, Default)]
pub struct RetryState {
    attempt_count: u32,
    last_error: Option<ResolveError>,
}

impl RetryState {
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn record_error(&mut self, err: ResolveError) {
        self.last_error = Some(err);
    }

    pub fn last_error(&self) -> Option<&ResolveError> {
        self.last_error.as_ref()
    }

    /// Message embedded in the terminal error
    pub fn last_error_message(&self) -> String {
        match &self.last_error {
            Some(e) => e.to_string(),
            None => "none".to_string(),
        }
    }
}

/// Outcome of an exhausted pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Applies the configured [`RetryStrategy`]
#[derive(Clone, Default)]
pub struct RetryController {
    strategy: Option<Arc<dyn RetryStrategy>>,
}

impl RetryController {
    pub fn new(strategy: Option<Arc<dyn RetryStrategy>>) -> Self {
        Self { strategy }
    }

    /// Count the exhausted pass and ask the strategy what to do next.
    ///
    /// A strategy that panics is treated as having disabled retries.
    pub fn on_exhausted(&self, state: &mut RetryState) -> RetryDecision {
        state.attempt_count += 1;
        let attempt = state.attempt_count;

        let Some(strategy) = &self.strategy else {
            return RetryDecision::GiveUp;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| strategy.next_delay(attempt))) {
            Ok(Some(delay)) => {
                info!(
                    "All sentinels failed (attempt {}), retrying in {:?}",
                    attempt, delay
                );
                RetryDecision::RetryAfter(delay)
            }
            Ok(None) => RetryDecision::GiveUp,
            Err(_) => {
                error!("Sentinel retry strategy panicked on attempt {}", attempt);
                RetryDecision::GiveUp
            }
        }
    }
}
