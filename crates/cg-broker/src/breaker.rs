//! Circuit breaker gating connection attempts per node
//!
//! A node's breaker opens once its consecutive failures reach the threshold and
//! stays open for the cooldown window. The first check after the window has
//! elapsed resets the node's counters, letting one more probe through
//! (half-open). Each node has its own window.

use std::time::{Duration, Instant};

use cg_common::NodeStatus;
use tracing::{debug, info};

use crate::node::NodeRegistry;

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_open(&self, registry: &mut NodeRegistry, index: usize) -> bool {
        self.is_open_at(registry, index, Instant::now())
    }

    /// Check the breaker for `index` as of `now`.
    ///
    /// A breaker found open past its cooldown is reset in `registry` and
    /// reported closed.
    pub fn is_open_at(&self, registry: &mut NodeRegistry, index: usize, now: Instant) -> bool {
        let Some(health) = registry.get(index) else {
            return false;
        };

        if health.consecutive_failures < self.failure_threshold {
            let stale_failure = health.status == NodeStatus::Failed
                && health
                    .last_attempt_at
                    .map(|at| now.saturating_duration_since(at) >= self.cooldown)
                    .unwrap_or(false);
            if stale_failure {
                registry.expire_failure(index);
            }
            return false;
        }

        // The window starts at the latest failure or the latest reset
        let window_start = match (health.last_attempt_at, health.last_reset_at) {
            (Some(attempt), Some(reset)) => Some(attempt.max(reset)),
            (attempt, reset) => attempt.or(reset),
        };

        let cooling_down = window_start
            .map(|start| now.saturating_duration_since(start) < self.cooldown)
            .unwrap_or(false);

        if cooling_down {
            debug!(
                node_index = index,
                failures = health.consecutive_failures,
                "Circuit breaker open"
            );
            return true;
        }

        info!(
            node_index = index,
            failures = health.consecutive_failures,
            "Circuit breaker cooldown elapsed, allowing probe"
        );
        registry.reset(index, now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn fail_times(registry: &mut NodeRegistry, index: usize, times: u32, at: Instant) {
        for _ in 0..times {
            registry.record_failure_at(index, at);
        }
    }

    #[test]
    fn test_closed_below_threshold() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        let mut registry = NodeRegistry::new(1);
        let now = Instant::now();
        fail_times(&mut registry, 0, 2, now);

        assert!(!breaker.is_open_at(&mut registry, 0, now));
        // Nothing was reset
        assert_eq!(registry.consecutive_failures(0), 2);
    }

    #[test]
    fn test_opens_at_threshold_within_cooldown() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        let mut registry = NodeRegistry::new(1);
        let now = Instant::now();
        fail_times(&mut registry, 0, 3, now);

        assert!(breaker.is_open_at(&mut registry, 0, now + Duration::from_secs(10)));
        assert!(breaker.is_open_at(&mut registry, 0, now + Duration::from_secs(299)));
        assert_eq!(registry.status(0), NodeStatus::Failed);
    }

    #[test]
    fn test_resets_after_cooldown() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        let mut registry = NodeRegistry::new(1);
        let now = Instant::now();
        fail_times(&mut registry, 0, 3, now);

        let later = now + Duration::from_secs(301);
        assert!(!breaker.is_open_at(&mut registry, 0, later));
        assert_eq!(registry.consecutive_failures(0), 0);
        assert_eq!(registry.status(0), NodeStatus::Unknown);

        // Still closed on the next check: one probe is permitted
        assert!(!breaker.is_open_at(&mut registry, 0, later));
    }

    #[test]
    fn test_failed_status_expires_below_threshold() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        let mut registry = NodeRegistry::new(1);
        let start = Instant::now();
        registry.record_failure_at(0, start);

        assert!(!breaker.is_open_at(&mut registry, 0, start + Duration::from_secs(10)));
        assert_eq!(registry.status(0), NodeStatus::Failed);

        assert!(!breaker.is_open_at(&mut registry, 0, start + Duration::from_secs(3600)));
        assert_eq!(registry.status(0), NodeStatus::Unknown);
        // Counters are untouched; only the status expires
        assert_eq!(registry.consecutive_failures(0), 1);
        assert!(registry.get(0).unwrap().last_reset_at.is_none());
    }

    #[test]
    fn test_reopens_after_failed_probes() {
        let breaker = CircuitBreaker::new(2, COOLDOWN);
        let mut registry = NodeRegistry::new(1);
        let start = Instant::now();
        fail_times(&mut registry, 0, 2, start);

        let later = start + Duration::from_secs(400);
        assert!(!breaker.is_open_at(&mut registry, 0, later));

        fail_times(&mut registry, 0, 2, later);
        assert!(breaker.is_open_at(&mut registry, 0, later + Duration::from_secs(1)));
    }

    #[test]
    fn test_cooldown_is_per_node() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        let mut registry = NodeRegistry::new(2);
        let start = Instant::now();
        registry.record_failure_at(0, start);
        registry.record_failure_at(1, start + Duration::from_secs(200));

        // Node 0's window elapsed, node 1's has not
        let check = start + Duration::from_secs(350);
        assert!(!breaker.is_open_at(&mut registry, 0, check));
        assert!(breaker.is_open_at(&mut registry, 1, check));
    }

    #[test]
    fn test_unknown_index_is_closed() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        let mut registry = NodeRegistry::new(1);
        assert!(!breaker.is_open(&mut registry, 7));
    }
}
