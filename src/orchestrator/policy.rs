#![allow(dead_code)]

//! Timeout scaling and retry backoff policy

use super::task::TaskCategory;
use std::time::Duration;

/// Multiplier applied to a task's base timeout by category
pub fn timeout_multiplier(category: TaskCategory) -> f64 {
    match category {
        TaskCategory::LlmAnalysis => 1.5,
        TaskCategory::VectorOperations => 1.3,
        TaskCategory::DataProcessing => 1.2,
        TaskCategory::CustomScript => 2.0,
        TaskCategory::ApiCall => 0.8,
        TaskCategory::Notification => 0.5,
        TaskCategory::WorkflowTrigger
        | TaskCategory::WorkflowEmbedded
        | TaskCategory::DataSync
        | TaskCategory::Monitoring
        | TaskCategory::Reporting => 1.0,
    }
}

/// Effective timeout for a task: base minutes scaled by category
pub fn timeout_for(category: TaskCategory, base_timeout_minutes: u64) -> Duration {
    let seconds = base_timeout_minutes as f64 * 60.0 * timeout_multiplier(category);
    Duration::from_secs_f64(seconds)
}

/// Exponential backoff configuration for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Cap on the delay between attempts
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt number (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25 * capped_delay;
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}
