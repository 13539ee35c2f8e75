//! Reconnection backoff.
//!
//! Formula: `min(delay_max, delay * 2^retry)`. Retry `0` waits the base
//! delay; with `delay_max == delay` the schedule is a fixed interval.

use std::time::Duration;

/// Delay before reconnection attempt number `retry` (zero-based).
#[must_use]
pub fn backoff_delay(retry: u32, delay: Duration, delay_max: Duration) -> Duration {
    let factor = 1u32 << retry.min(16);
    delay.saturating_mul(factor).min(delay_max.max(delay))
}
