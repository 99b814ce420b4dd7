//! Exponential backoff with jitter.

use std::time::Duration;

/// Delay before retry `attempt` (0-based): `base * 2^attempt` plus up to a
/// quarter of `base` of jitter, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));

    let jitter_range = base_ms / 4;
    let jitter = if jitter_range > 0 {
        fastrand::u64(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(exponential.saturating_add(jitter)).min(max)
}
