//! Attempt budgets for the submit and poll stages.

use std::time::Duration;

/// Whether another attempt may run after `attempt` attempts have been made.
///
/// `attempt` is 1-indexed: the count *including* the attempt that just ran.
pub fn should_retry(attempt: i32, budget: i32) -> bool {
    attempt < budget
}

/// Budgets and cadence for one job's trip through the pipeline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Calls into the provider's submit endpoint.
    pub submit_attempts: i32,
    /// Delay before a failed submission is delivered again.
    pub submit_retry_delay: Duration,
    /// Status checks while waiting on an asynchronous task.
    pub poll_attempts: i32,
    /// Delay between status checks.
    pub poll_interval: Duration,
    /// Delay between accepting a task and the first status check.
    pub initial_poll_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            submit_retry_delay: Duration::from_secs(10),
            poll_attempts: 30,
            poll_interval: Duration::from_secs(10),
            initial_poll_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn can_resubmit(&self, attempt: i32) -> bool {
        should_retry(attempt, self.submit_attempts)
    }

    pub fn can_repoll(&self, attempt: i32) -> bool {
        should_retry(attempt, self.poll_attempts)
    }

    /// Upper bound on how long a task may sit in the poll stage.
    pub fn poll_window(&self) -> Duration {
        self.initial_poll_delay + self.poll_interval * self.poll_attempts.max(0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_stops_at_budget() {
        assert!(should_retry(1, 3));
        assert!(should_retry(2, 3));
        assert!(!should_retry(3, 3));
        assert!(!should_retry(4, 3));
    }

    #[test]
    fn test_single_attempt_budget_never_retries() {
        assert!(!should_retry(1, 1));
    }

    #[test]
    fn test_default_poll_window_is_about_five_minutes() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.poll_window(), Duration::from_secs(305));
        assert!(policy.can_repoll(29));
        assert!(!policy.can_repoll(30));
    }
}
