use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use super::job::JobId;

/// Re-dispatch policy for jobs failing with a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Whether a job that failed transiently on attempt `attempts` gets another one.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }

    /// Delay before re-running a job whose previous attempt number was `attempt`.
    ///
    /// Exponential from `initial_backoff`, capped at `max_backoff`, plus a jitter derived
    /// from the job identity so parallel retries do not line up.
    pub fn backoff_delay(&self, job: &JobId, attempt: u32) -> Duration {
        if self.initial_backoff.is_zero() && self.jitter.is_zero() {
            return Duration::ZERO;
        }

        let shift = u32::min(attempt.saturating_sub(1), 20);
        let exponential_ms = self
            .initial_backoff
            .as_millis()
            .saturating_mul(1u128 << shift);
        let capped_ms = exponential_ms.min(self.max_backoff.as_millis());

        let jitter_ms = deterministic_jitter(job_seed(job), attempt, self.jitter.as_millis());
        let total_ms = capped_ms.saturating_add(jitter_ms);
        Duration::from_millis(total_ms.min(u64::MAX as u128) as u64)
    }
}

fn job_seed(job: &JobId) -> u64 {
    let mut hasher = DefaultHasher::new();
    job.hash(&mut hasher);
    hasher.finish()
}

fn deterministic_jitter(seed: u64, attempt: u32, jitter_cap: u128) -> u128 {
    if jitter_cap == 0 {
        return 0;
    }

    let mut x = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;

    (x as u128) % (jitter_cap + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(range: &str) -> JobId {
        JobId::new("store_balances", range.parse().expect("fixture range"))
    }

    #[test]
    fn allows_retry_until_attempts_are_spent() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::none()
        };
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::none().allows_retry(1));
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: Duration::ZERO,
        };
        let id = job("0-10");
        assert_eq!(policy.backoff_delay(&id, 1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(&id, 2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(&id, 3), Duration::from_millis(350));
        assert_eq!(policy.backoff_delay(&id, 9), Duration::from_millis(350));
        assert_eq!(RetryPolicy::none().backoff_delay(&id, 4), Duration::ZERO);
    }

    #[test]
    fn jitter_is_bounded_and_deterministic_per_job() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter: Duration::from_millis(50),
        };
        for range in ["0-10", "10-20", "20-30"] {
            let id = job(range);
            let delay = policy.backoff_delay(&id, 1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
            assert_eq!(delay, policy.backoff_delay(&id, 1));
        }
    }
}
