//! Retry/backoff policy for transient job failures: exponential backoff
//! with a 1s base and a 10-minute cap, jittered, capped at a small number of
//! attempts.

use std::time::Duration;

use storyloom_protocol::defaults::{
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_SECONDS, DEFAULT_RETRY_CAP_SECONDS,
};

/// Jitter ceiling in milliseconds, added on top of the doubled backoff so a
/// burst of simultaneously-failing jobs doesn't retry in lockstep.
const JITTER_MS: u64 = 250;

/// Exponential backoff before the `attempts`-th retry: `base * 2^attempts`,
/// clamped to the cap, plus jitter.
pub fn backoff_duration(attempts: u32) -> Duration {
    let base = DEFAULT_RETRY_BASE_SECONDS;
    let doubled = base.saturating_mul(1u64 << attempts.min(20));
    let capped = doubled.min(DEFAULT_RETRY_CAP_SECONDS);

    let jitter_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_millis() as u64 % JITTER_MS)
        .unwrap_or(0);

    Duration::from_secs(capped) + Duration::from_millis(jitter_ms)
}

/// Whether a job already at `attempts` (the failing one included) should be
/// retried at all, per the `max_retry_attempts` default of 3.
pub fn should_retry(attempts: i64, is_transient: bool) -> bool {
    is_transient && attempts < DEFAULT_MAX_RETRY_ATTEMPTS as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let first = backoff_duration(0).as_secs();
        let second = backoff_duration(1).as_secs();
        let tenth = backoff_duration(10).as_secs();
        assert!(first >= DEFAULT_RETRY_BASE_SECONDS);
        assert!(second >= first);
        assert_eq!(tenth, DEFAULT_RETRY_CAP_SECONDS);
    }

    #[test]
    fn stops_retrying_past_max_attempts() {
        assert!(should_retry(2, true));
        assert!(!should_retry(3, true));
        assert!(!should_retry(0, false));
    }
}
