//! # Linear backoff policy for restarting service workers.
//!
//! [`BackoffPolicy`] controls how restart delays grow after repeated failures.
//! It is parameterized by:
//! - [`BackoffPolicy::step`] the delay added per failed attempt;
//! - [`BackoffPolicy::max`] the maximum delay cap;
//! - [`BackoffPolicy::jitter`] the randomization applied to the capped delay.
//!
//! The delay before restart `n` (1-based) is `step × n`, clamped to `max`, then jitter
//! is applied. The base is derived purely from the attempt number, so jitter output
//! never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use modvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     step: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(1), Duration::from_millis(100));
//! assert_eq!(backoff.next(3), Duration::from_millis(300));
//! assert_eq!(backoff.next(50), Duration::from_secs(1));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::policies::jitter::JitterPolicy;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay added for every consecutive failure.
    #[serde(with = "duration_ms")]
    pub step: Duration,
    /// Maximum delay cap.
    #[serde(with = "duration_ms")]
    pub max: Duration,
    /// Jitter policy applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a strategy with:
    /// - `step = 2s`;
    /// - `max = 5m`;
    /// - `jitter = None`.
    fn default() -> Self {
        Self {
            step: Duration::from_secs(2),
            max: Duration::from_secs(5 * 60),
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay before the given restart attempt (1-based).
    ///
    /// Attempt `0` yields zero (nothing failed yet).
    pub fn next(&self, attempt: u32) -> Duration {
        let base = self.step.saturating_mul(attempt).min(self.max);
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(step_ms: u64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy {
            step: Duration::from_millis(step_ms),
            max: Duration::from_millis(max_ms),
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_attempt_zero_is_immediate() {
        assert_eq!(linear(100, 30_000).next(0), Duration::ZERO);
    }

    #[test]
    fn test_linear_growth_no_jitter() {
        let policy = linear(100, 30_000);
        assert_eq!(policy.next(1), Duration::from_millis(100));
        assert_eq!(policy.next(2), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(300));
        assert_eq!(policy.next(10), Duration::from_secs(1));
    }

    #[test]
    fn test_non_decreasing() {
        let policy = linear(250, 2_000);
        let mut prev = Duration::ZERO;
        for attempt in 1..40 {
            let d = policy.next(attempt);
            assert!(d >= prev, "attempt {attempt}: {d:?} < {prev:?}");
            prev = d;
        }
    }

    #[test]
    fn test_huge_attempt_clamps_to_max() {
        let policy = linear(100, 60_000);
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..linear(1_000, 30_000)
        };
        for _ in 0..50 {
            let delay = policy.next(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
    }
}
