//! Retry policy with linear backoff.
//!
//! Attempt `n` (0-based) that fails transiently is followed by a sleep of
//! `base_delay * (n + 1)`, except after the last attempt. With the default
//! policy (3 attempts, 1s) the schedule is `1s, 2s`.

use backon::BackoffBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often to call the primary provider and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total primary attempts, including the first. Zero is treated as one.
    pub max_retries: u32,

    /// Delay unit; the wait after attempt `n` is `base_delay * (n + 1)`.
    #[serde(with = "humantime_duration")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Number of primary calls an invocation may make.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Backoff builder for `backon::Retryable::retry`.
    pub fn backoff(&self) -> LinearBackoffBuilder {
        LinearBackoffBuilder {
            base_delay: self.base_delay,
            retries: self.attempts() - 1,
        }
    }

    /// The full sleep schedule, one entry per retry.
    pub fn delays(&self) -> Vec<Duration> {
        self.backoff().build().collect()
    }
}

/// Builds a [`LinearBackoff`]; see [`RetryPolicy::backoff`].
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoffBuilder {
    base_delay: Duration,
    retries: u32,
}

impl BackoffBuilder for LinearBackoffBuilder {
    type Backoff = LinearBackoff;

    fn build(self) -> Self::Backoff {
        LinearBackoff {
            base_delay: self.base_delay,
            retries: self.retries,
            step: 0,
        }
    }
}

/// Yields `base, 2 * base, ...` then `None` once the retries are spent.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay: Duration,
    retries: u32,
    step: u32,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.step >= self.retries {
            return None;
        }
        self.step += 1;
        Some(self.base_delay.saturating_mul(self.step))
    }
}

/// Serde adapter for human-readable durations ("500ms", "2s", "1m 30s").
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
