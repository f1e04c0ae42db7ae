//! Resilience patterns for relay-runtime.
//!
//! This module provides:
//! - Retry policy (attempt bound + base delay)
//! - Linear backoff schedule consumed by the `backon` retry combinator

mod retry;

pub use retry::{LinearBackoff, LinearBackoffBuilder, RetryPolicy};

pub(crate) use retry::humantime_duration;
