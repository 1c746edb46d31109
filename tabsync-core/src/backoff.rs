//! Retry backoff for repeatedly failing queue operations.
//!
//! Deterministic exponential delays: 1 s after the first failure,
//! doubling per attempt, capped at 16 s. After [`MAX_ATTEMPTS`] failures
//! an operation is surfaced to the caller instead of being retried
//! silently.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Failed attempts after which an operation is surfaced, not retried.
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_MS: u64 = 1_000;
const CAP_MS: u64 = 16_000;

/// Delay to wait after the given number of failed attempts.
///
/// `retry_delay(1)` is 1 s, `retry_delay(2)` 2 s, doubling up to the
/// 16 s cap. Zero attempts means the operation has never failed and is
/// due immediately.
pub fn retry_delay(attempts: u32) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let exp = attempts.saturating_sub(1).min(63);
    let ms = BASE_MS.saturating_mul(1u64 << exp).min(CAP_MS);
    Duration::from_millis(ms)
}

/// Check whether a failed operation is due for another attempt at `now`.
pub fn is_retry_due(attempts: u32, last_attempt_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(last) = last_attempt_at else {
        return true;
    };
    let delay = retry_delay(attempts);
    match chrono::Duration::from_std(delay) {
        Ok(d) => now >= last + d,
        Err(_) => false,
    }
}
