//! Retry pacing as a pure function of attempt count and policy.
//!
//! Keeping the arithmetic free of clocks and RNG lets tests assert exact
//! bounds; callers supply the jitter sample.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Hard ceiling on any computed backoff delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Retry policy for analyzer requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first; 0 means exactly one attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap: BACKOFF_CAP,
        }
    }
}

/// Delay before retry number `attempt` (0-based).
///
/// Without a server hint: `min(cap, base * 2^attempt) + base * jitter_unit`
/// where `jitter_unit` is a uniform sample from `[0, 1)` supplied by the
/// caller, so `base <= delay <= min(cap, base * 2^attempt) + base`.
///
/// A `Retry-After` hint is honored verbatim, clamped to the cap and
/// without added jitter.
#[must_use]
pub fn backoff_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<Duration>,
    jitter_unit: f64,
) -> Duration {
    if let Some(hint) = retry_after {
        return hint.min(policy.cap);
    }

    let factor = 2u32.checked_pow(attempt.min(20)).unwrap_or(u32::MAX);
    let exponential = policy
        .base
        .checked_mul(factor)
        .unwrap_or(policy.cap)
        .min(policy.cap);
    exponential + policy.base.mul_f64(jitter_unit.clamp(0.0, 1.0))
}

/// Parse a `Retry-After` header value: either delta-seconds or an
/// HTTP-date.
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?;
    (when.with_timezone(&Utc) - now).to_std().ok()
}
