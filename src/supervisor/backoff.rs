//! Restart policy and exponential backoff for supervised jobs.

use crate::config::SupervisorConfig;
use std::time::Duration;

/// How a supervised job is restarted after a crash.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Crashes tolerated before the job is abandoned for good.
    pub max_restarts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the doubling delay.
    pub max_delay: Duration,
    /// An attempt that ran longer than this resets the delay to `base_delay`.
    pub stability_threshold: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for RestartPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            base_delay: Duration::from_secs_f64(config.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs_f64(config.max_delay_secs.max(0.0)),
            stability_threshold: Duration::from_secs(config.stability_threshold_secs),
        }
    }
}

impl RestartPolicy {
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_stability_threshold(mut self, threshold: Duration) -> Self {
        self.stability_threshold = threshold;
        self
    }
}

/// Base-2 exponential backoff with a stability reset.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    stability_threshold: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: &RestartPolicy) -> Self {
        let base = policy.base_delay.min(policy.max_delay);
        Self {
            base,
            max: policy.max_delay,
            stability_threshold: policy.stability_threshold,
            current: base,
        }
    }

    /// Delay to wait after a crash of an attempt that ran for `uptime`.
    ///
    /// Consecutive calls with short uptimes yield `base, 2*base, 4*base, ...`
    /// capped at `max`. An uptime above the stability threshold restarts the
    /// sequence at `base`.
    pub fn next_delay(&mut self, uptime: Duration) -> Duration {
        if uptime > self.stability_threshold {
            self.current = self.base;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Delay the next short-lived crash would get.
    pub fn peek(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64) -> RestartPolicy {
        RestartPolicy::default()
            .with_delays(Duration::from_secs(base), Duration::from_secs(max))
            .with_stability_threshold(Duration::from_secs(300))
    }

    #[test]
    fn delays_double_up_to_max() {
        let mut backoff = Backoff::new(&policy(5, 60));
        let quick = Duration::from_secs(1);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay(quick).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn kth_delay_matches_closed_form() {
        let p = policy(1, 300);
        let mut backoff = Backoff::new(&p);
        for k in 1..=12u32 {
            let expected = (1u64 << (k - 1)).min(300);
            assert_eq!(backoff.next_delay(Duration::ZERO).as_secs(), expected, "k={k}");
        }
    }

    #[test]
    fn long_uptime_resets_to_base() {
        let mut backoff = Backoff::new(&policy(5, 300));
        for _ in 0..4 {
            backoff.next_delay(Duration::from_secs(2));
        }
        assert_eq!(backoff.peek(), Duration::from_secs(80));

        let delay = backoff.next_delay(Duration::from_secs(301));
        assert_eq!(delay, Duration::from_secs(5));
        assert_eq!(backoff.peek(), Duration::from_secs(10));
    }

    #[test]
    fn uptime_equal_to_threshold_does_not_reset() {
        let mut backoff = Backoff::new(&policy(5, 300));
        backoff.next_delay(Duration::ZERO);
        assert_eq!(
            backoff.next_delay(Duration::from_secs(300)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn policy_from_config() {
        let config = SupervisorConfig {
            max_restarts: 7,
            base_delay_secs: 0.5,
            max_delay_secs: 4.0,
            stability_threshold_secs: 60,
        };
        let p = RestartPolicy::from(&config);
        assert_eq!(p.max_restarts, 7);
        assert_eq!(p.base_delay, Duration::from_millis(500));
        assert_eq!(p.max_delay, Duration::from_secs(4));
        assert_eq!(p.stability_threshold, Duration::from_secs(60));
    }
}
