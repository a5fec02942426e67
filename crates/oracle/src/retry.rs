//! Retry classification and backoff arithmetic. Everything here is pure except [`sample_jitter`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on every further attempt.
    pub base_backoff: Duration,
    pub backoff_jitter_ms: u64,
    /// Delay after a timeout or connection failure.
    pub transient_delay: Duration,
    pub transient_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_secs(1),
            backoff_jitter_ms: 400,
            transient_delay: Duration::from_millis(500),
            transient_jitter_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    Retryable { retry_after: Option<Duration> },
    Fatal,
}

/// Rate limiting and server-side failures are retryable; any other non-2xx status is final.
pub fn classify(status: u16, retry_after: Option<Duration>) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 | 500..=599 => Disposition::Retryable { retry_after },
        _ => Disposition::Fatal,
    }
}

static RETRY_DELAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).expect("valid retryDelay regex")
});

/// Server-supplied delay: a `Retry-After` header in whole seconds, or a `retryDelay` such as
/// `"2s"` inside the error body.
pub fn parse_retry_after(header: Option<&str>, body: &str) -> Option<Duration> {
    if let Some(secs) = header.and_then(|h| h.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let caps = RETRY_DELAY.captures(body)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Delay after retryable attempt number `attempt` (1-based). A server hint is honored as is;
/// otherwise the delay is `base * 2^(attempt-1)` plus `jitter_ms`.
pub fn backoff_delay(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
    jitter_ms: u64,
) -> Duration {
    if let Some(hint) = retry_after {
        return hint;
    }
    let exponent = attempt.saturating_sub(1).min(16);
    policy.base_backoff.saturating_mul(1u32 << exponent) + Duration::from_millis(jitter_ms)
}

pub fn transient_delay(policy: &RetryPolicy, jitter_ms: u64) -> Duration {
    policy.transient_delay + Duration::from_millis(jitter_ms)
}

/// Uniform-ish value in `0..bound_ms`. Falls back to zero if the OS RNG is unavailable.
pub fn sample_jitter(bound_ms: u64) -> u64 {
    if bound_ms == 0 {
        return 0;
    }
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf) % bound_ms,
        Err(err) => {
            log::debug!("jitter source unavailable: {err}");
            0
        }
    }
}
