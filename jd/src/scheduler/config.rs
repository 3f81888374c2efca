//! Scheduler configuration

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS, Priority};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max jobs running at once
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Fallback wake-up interval for timeout and backoff checks
    #[serde(rename = "tick-interval-ms", default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Priority for submissions that don't specify one
    #[serde(rename = "default-priority", default)]
    pub default_priority: Priority,

    /// Retry budget for submissions that don't specify one
    #[serde(rename = "default-max-retries", default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Per-attempt timeout for submissions that don't specify one
    #[serde(rename = "default-timeout-ms", default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Event bus buffer per subscriber
    #[serde(rename = "event-capacity", default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Delay policy between automatic retries
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_interval_ms: default_tick_interval_ms(),
            default_priority: Priority::Normal,
            default_max_retries: default_max_retries(),
            default_timeout_ms: default_timeout_ms(),
            event_capacity: default_event_capacity(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Concurrency ceiling, never below one
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.max(1)
    }

    /// Get the tick interval as a Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Exponential backoff with jitter: `min(base * 2^retry_count, max) * (1 ± jitter)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(rename = "base-ms", default = "default_backoff_base_ms")]
    pub base_ms: u64,

    #[serde(rename = "max-ms", default = "default_backoff_max_ms")]
    pub max_ms: u64,

    /// Fraction of the delay to randomize, 0.0..=1.0
    #[serde(default = "default_backoff_jitter")]
    pub jitter: f64,
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_backoff_jitter() -> f64 {
    0.2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            jitter: default_backoff_jitter(),
        }
    }
}

impl BackoffConfig {
    /// Delay before the job goes back into the queue, given retries used so far
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let capped = self.base_ms.saturating_mul(factor).min(self.max_ms) as f64;

        let jitter = self.jitter.clamp(0.0, 1.0);
        let scale = if jitter > 0.0 {
            1.0 + rand::rng().random_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * scale).round().max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.default_priority, Priority::Normal);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.backoff.base_ms, 1_000);
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        let config = SchedulerConfig {
            max_concurrent: 0,
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.max_concurrent(), 1);
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_backoff_exponential_without_jitter() {
        let backoff = BackoffConfig {
            base_ms: 100,
            max_ms: 1_000,
            jitter: 0.0,
        };
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(backoff.delay_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = BackoffConfig {
            base_ms: 1_000,
            max_ms: 10_000,
            jitter: 0.25,
        };
        for _ in 0..200 {
            let delay = backoff.delay_for(1).as_millis();
            assert!((1_500..=2_500).contains(&delay), "delay {} out of bounds", delay);
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SchedulerConfig = serde_yaml::from_str("max-concurrent: 8\nbackoff:\n  base-ms: 50\n").unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.backoff.base_ms, 50);
        assert_eq!(config.backoff.max_ms, 60_000);
        assert_eq!(config.tick_interval_ms, 250);
    }
}
