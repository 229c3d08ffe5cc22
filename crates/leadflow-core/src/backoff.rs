//! Retry policy with fixed backoff steps.
//!
//! Stateless: the caller tracks the retry count and asks the policy whether
//! another attempt is allowed and how long to wait before it.

use std::time::Duration;

use leadflow_types::config::QueueConfig;

/// Fixed-step backoff. The last step repeats once the steps run out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    steps: Vec<Duration>,
}

impl RetryPolicy {
    /// Build from explicit steps. An empty list means "retry immediately".
    pub fn new(steps: Vec<Duration>) -> Self {
        Self { steps }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config
                .backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    /// Delay before retry number `retry_count` (1-based).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if self.steps.is_empty() {
            return Duration::ZERO;
        }
        let idx = (retry_count.saturating_sub(1) as usize).min(self.steps.len() - 1);
        self.steps[idx]
    }

    /// Whether a row that has now failed `retry_count` times goes back to
    /// the queue.
    pub fn should_retry(retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }

    /// `delay_for` as a chrono duration for timestamp arithmetic.
    pub fn chrono_delay_for(&self, retry_count: u32) -> chrono::Duration {
        chrono::Duration::from_std(self.delay_for(retry_count))
            .unwrap_or_else(|_| chrono::Duration::seconds(300))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
