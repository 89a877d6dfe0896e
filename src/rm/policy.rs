use crate::config::ReliableMessagingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Growth of the delay between retransmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

/// Runtime reliable messaging policy
#[derive(Debug, Clone)]
pub struct RmPolicy {
    pub retransmission_interval: Duration,
    pub backoff: BackoffStrategy,
    pub max_retransmission_interval: Duration,
    /// Resends after the first transmission before delivery is declared failed
    pub max_retries: u32,
    pub inactivity_timeout: Duration,
    pub termination_grace: Duration,
    pub send_timeout: Duration,
    pub in_order_delivery: bool,
    /// Messages buffered for in-order delivery may run at most this far ahead
    pub out_of_order_window: u64,
    pub disabled_services: HashSet<String>,
}

impl Default for RmPolicy {
    fn default() -> Self {
        ReliableMessagingConfig::default().to_policy()
    }
}

impl RmPolicy {
    /// Whether `service` accepts CreateSequence requests
    pub fn is_enabled_for(&self, service: &str) -> bool {
        !self.disabled_services.contains(service)
    }

    pub fn disable_service(mut self, service: impl Into<String>) -> Self {
        self.disabled_services.insert(service.into());
        self
    }

    /// Delay before the next retransmission after `attempt` transmissions
    ///
    /// `attempt` starts at 1 for the original send. Exponential backoff
    /// doubles the base interval per attempt and is capped at
    /// `max_retransmission_interval`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.retransmission_interval,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow((attempt - 1).min(31));
                self.retransmission_interval.saturating_mul(factor)
            }
        };
        delay.min(self.max_retransmission_interval.max(self.retransmission_interval))
    }

    /// True once `send_count` transmissions exhausted the retry budget
    pub fn retries_exhausted(&self, send_count: u32) -> bool {
        send_count > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffStrategy) -> RmPolicy {
        RmPolicy {
            retransmission_interval: Duration::from_millis(100),
            backoff,
            max_retransmission_interval: Duration::from_millis(500),
            max_retries: 3,
            ..RmPolicy::default()
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = policy(BackoffStrategy::Exponential);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(500));
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = policy(BackoffStrategy::Fixed);
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(100));
    }

    #[test]
    fn test_retry_budget() {
        let policy = policy(BackoffStrategy::Fixed);
        assert!(!policy.retries_exhausted(1));
        assert!(!policy.retries_exhausted(3));
        assert!(policy.retries_exhausted(4));
    }

    #[test]
    fn test_service_enablement() {
        let policy = RmPolicy::default().disable_service("Legacy");
        assert!(!policy.is_enabled_for("Legacy"));
        assert!(policy.is_enabled_for("Orders"));
    }
}
