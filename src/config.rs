//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the module runtime and its schedulers.
//!
//! Config is used in two ways:
//! 1. **Runtime creation**: `Runtime::builder(config)`
//! 2. **Per-unit defaults**: task max delay, service worker backoff, repeat floor
//!
//! Durations are (de)serialized as integer milliseconds so the struct can be loaded
//! from a plain JSON configuration store:
//! ```json
//! { "microtask_threshold": 8, "low_priority_max_wait": 5000 }
//! ```
//!
//! ## Floors
//! - `microtask_threshold` is never below `microtask_floor` (see [`Config::threshold_clamped`]).
//! - `Task::repeat` intervals are never below `min_repeat`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policies::BackoffPolicy;

/// Minimum microtask concurrency threshold accepted by default.
pub const DEFAULT_MICROTASK_FLOOR: usize = 4;

/// Global configuration for the module runtime.
///
/// ## Field semantics
/// - `microtask_threshold`: shared concurrency cap for microtasks and task executions
/// - `medium_priority_max_wait` / `low_priority_max_wait`: longest a medium/low microtask
///   waits for a clearance before it runs anyway
/// - `max_execution_wait`: after this long a running task gives its slot back even if unfinished
/// - `default_max_delay`: longest a queued task waits before it is force-run (`0` = unbounded)
/// - `service_backoff`: restart delays of service workers
/// - `module_stop_timeout`: how long a stopping module waits for its live work to drain
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of microtasks (and task executions) in flight.
    pub microtask_threshold: usize,

    /// Lowest value `microtask_threshold` may be set to.
    pub microtask_floor: usize,

    /// Maximum wait of a medium priority microtask for its clearance.
    #[serde(with = "duration_ms")]
    pub medium_priority_max_wait: Duration,

    /// Maximum wait of a low priority microtask for its clearance.
    #[serde(with = "duration_ms")]
    pub low_priority_max_wait: Duration,

    /// Ceiling after which a running task releases its execution slot.
    ///
    /// The task itself keeps running; the cap can be exceeded transiently.
    #[serde(with = "duration_ms")]
    pub max_execution_wait: Duration,

    /// Default maximum delay of a queued task.
    #[serde(with = "duration_ms")]
    pub default_max_delay: Duration,

    /// Shortest accepted repeat interval.
    #[serde(with = "duration_ms")]
    pub min_repeat: Duration,

    /// Backoff between restarts of a failing service worker.
    pub service_backoff: BackoffPolicy,

    /// Bounded wait for workers, tasks and microtasks of a stopping module.
    #[serde(with = "duration_ms")]
    pub module_stop_timeout: Duration,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,

    /// Start only enabled modules and their dependencies.
    pub module_management: bool,
}

impl Config {
    /// Returns the microtask threshold raised to the configured floor.
    #[inline]
    pub fn threshold_clamped(&self) -> usize {
        self.microtask_threshold.max(self.microtask_floor).max(1)
    }

    /// Returns the default task max delay as an `Option`.
    ///
    /// - `None` → queued tasks wait for a slot indefinitely
    /// - `Some(d)` → force-run after `d`
    #[inline]
    pub fn max_delay(&self) -> Option<Duration> {
        if self.default_max_delay.is_zero() {
            None
        } else {
            Some(self.default_max_delay)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Clamps a repeat interval to `min_repeat`.
    #[inline]
    pub fn repeat_clamped(&self, interval: Duration) -> Duration {
        interval.max(self.min_repeat)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `microtask_threshold = max(4, 2 × available parallelism)`
    /// - `medium_priority_max_wait = 1s`, `low_priority_max_wait = 3s`
    /// - `max_execution_wait = 60s`
    /// - `default_max_delay = 5m`, `min_repeat = 1s`
    /// - `service_backoff = BackoffPolicy::default()` (linear, 2s step)
    /// - `module_stop_timeout = 10s`
    /// - `bus_capacity = 1024`, `module_management = false`
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            microtask_threshold: (cpus * 2).max(DEFAULT_MICROTASK_FLOOR),
            microtask_floor: DEFAULT_MICROTASK_FLOOR,
            medium_priority_max_wait: Duration::from_secs(1),
            low_priority_max_wait: Duration::from_secs(3),
            max_execution_wait: Duration::from_secs(60),
            default_max_delay: Duration::from_secs(5 * 60),
            min_repeat: Duration::from_secs(1),
            service_backoff: BackoffPolicy::default(),
            module_stop_timeout: Duration::from_secs(10),
            bus_capacity: 1024,
            module_management: false,
        }
    }
}

/// Serializes a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_respects_floor() {
        let cfg = Config {
            microtask_threshold: 2,
            ..Config::default()
        };
        assert_eq!(cfg.threshold_clamped(), DEFAULT_MICROTASK_FLOOR);

        let cfg = Config {
            microtask_threshold: 1,
            microtask_floor: 1,
            ..Config::default()
        };
        assert_eq!(cfg.threshold_clamped(), 1);
    }

    #[test]
    fn test_zero_max_delay_is_unbounded() {
        let cfg = Config {
            default_max_delay: Duration::ZERO,
            ..Config::default()
        };
        assert!(cfg.max_delay().is_none());
        assert_eq!(Config::default().max_delay(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_load_partial_json() {
        let cfg: Config =
            serde_json::from_str(r#"{ "microtask_threshold": 12, "low_priority_max_wait": 5000 }"#)
                .unwrap();
        assert_eq!(cfg.microtask_threshold, 12);
        assert_eq!(cfg.low_priority_max_wait, Duration::from_secs(5));
        assert_eq!(cfg.medium_priority_max_wait, Duration::from_secs(1));
        assert!(!cfg.module_management);
    }

    #[test]
    fn test_repeat_clamped() {
        let cfg = Config::default();
        assert_eq!(cfg.repeat_clamped(Duration::from_millis(10)), Duration::from_secs(1));
        assert_eq!(cfg.repeat_clamped(Duration::from_secs(7)), Duration::from_secs(7));
    }
}
