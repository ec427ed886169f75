//! Common time helpers for cegs_core.
use std::time::Duration;

/// Longest a cooperative wait may sleep before re-checking the shutdown flag.
pub const MAX_WAIT_SLICE: Duration = Duration::from_millis(35);

/// Build a `Duration` from a millisecond config value.
#[inline]
pub const fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Next sleep for a sliced wait: never longer than `slice`, never past `remaining`.
#[inline]
pub fn next_slice(remaining: Duration, slice: Duration) -> Duration {
    remaining.min(slice)
}
