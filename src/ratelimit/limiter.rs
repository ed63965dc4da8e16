//! Fixed-window admission.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::counter::{CounterRecord, CounterStore};
use super::key::RateLimitKey;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window ends; only set on denial
    pub retry_after_secs: Option<u64>,
}

impl AdmissionDecision {
    fn allow(remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            retry_after_secs: None,
        }
    }

    fn deny(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            retry_after_secs: Some(retry_after_secs(reset_at, now)),
        }
    }

    /// Window end as whole unix seconds.
    pub fn reset_unix_secs(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Whole seconds until `reset_at`, rounded up and never negative.
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}

/// Fixed-window counter limiter.
///
/// Every key gets its own window that starts on the first request and lasts
/// `window`. Counts reset entirely when the window ends.
#[derive(Debug)]
pub struct WindowLimiter {
    /// Shared counter state
    store: Arc<CounterStore>,
    /// Window length applied to every key
    window: Duration,
}

impl WindowLimiter {
    /// Create a new limiter over an injected store.
    pub fn new(store: Arc<CounterStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    /// Record one request for `key` and decide whether it is admitted.
    ///
    /// The read-decide-write sequence runs under the key's shard lock, so
    /// concurrent requests for one key never over-admit.
    pub fn check_and_consume(
        &self,
        key: &RateLimitKey,
        quota: u64,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let window = self.window;

        let decision = self.store.update(key, |slot| match slot {
            Some(record) if !record.is_expired(now) => {
                if record.count >= quota {
                    AdmissionDecision::deny(record.window_reset_at, now)
                } else {
                    record.count += 1;
                    AdmissionDecision::allow(quota - record.count, record.window_reset_at)
                }
            }
            _ => {
                // A zero quota opens the window without admitting anything
                if quota == 0 {
                    let record = CounterRecord::start(0, now, window);
                    *slot = Some(record);
                    AdmissionDecision::deny(record.window_reset_at, now)
                } else {
                    let record = CounterRecord::start(1, now, window);
                    *slot = Some(record);
                    trace!(key = %key, reset_at = %record.window_reset_at, "Started new window");
                    AdmissionDecision::allow(quota - 1, record.window_reset_at)
                }
            }
        });

        if decision.allowed {
            trace!(key = %key, remaining = decision.remaining, "Request admitted");
        } else {
            debug!(
                key = %key,
                quota = quota,
                retry_after = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Get the consumed count for a key, if a record exists.
    pub fn get_counter_value(&self, key: &RateLimitKey) -> Option<u64> {
        self.store.get(key).map(|r| r.count)
    }

    /// Reclaim records whose window ended more than one window ago.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.store.sweep(now, self.window)
    }
}

impl RateLimiterBackend for WindowLimiter {
    fn check_and_consume(
        &self,
        key: &RateLimitKey,
        quota: u64,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        WindowLimiter::check_and_consume(self, key, quota, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn limiter(window_secs: i64) -> WindowLimiter {
        WindowLimiter::new(Arc::new(CounterStore::new()), Duration::seconds(window_secs))
    }

    #[test]
    fn test_first_request_opens_window() {
        let limiter = limiter(60);
        let key = RateLimitKey::new("TestBot", "1.2.3.4");

        let decision = limiter.check_and_consume(&key, 5, t(0));

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.reset_at, t(60));
        assert_eq!(decision.retry_after_secs, None);
        assert_eq!(limiter.get_counter_value(&key), Some(1));
    }

    #[test]
    fn test_remaining_decreases_then_denies() {
        let limiter = limiter(60);
        let key = RateLimitKey::new("TestBot", "1.2.3.4");
        let quota = 4;

        for expected in (0..quota).rev() {
            let decision = limiter.check_and_consume(&key, quota, t(1));
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let decision = limiter.check_and_consume(&key, quota, t(1));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(limiter.get_counter_value(&key), Some(quota));
    }

    #[test]
    fn test_scenario_two_per_minute() {
        let limiter = limiter(60);
        let key = RateLimitKey::new("TestBot", "1.2.3.4");

        let first = limiter.check_and_consume(&key, 2, t(0));
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        let second = limiter.check_and_consume(&key, 2, t(1));
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_and_consume(&key, 2, t(2));
        assert!(!third.allowed);
        assert_eq!(third.retry_after_secs, Some(58));
        assert_eq!(third.reset_unix_secs(), t(60).timestamp());

        let fourth = limiter.check_and_consume(&key, 2, t(61));
        assert!(fourth.allowed);
        assert_eq!(fourth.remaining, 1);
        assert_eq!(fourth.reset_at, t(121));
    }

    #[test]
    fn test_window_resets_exactly_at_boundary() {
        let limiter = limiter(10);
        let key = RateLimitKey::new("TestBot", "1.2.3.4");

        limiter.check_and_consume(&key, 1, t(0));
        assert!(!limiter.check_and_consume(&key, 1, t(9)).allowed);

        let decision = limiter.check_and_consume(&key, 1, t(10));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(limiter.get_counter_value(&key), Some(1));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = limiter(60);
        let key = RateLimitKey::new("TestBot", "1.2.3.4");
        limiter.check_and_consume(&key, 1, t(0));

        let now = t(2) + Duration::milliseconds(1);
        let decision = limiter.check_and_consume(&key, 1, now);
        assert_eq!(decision.retry_after_secs, Some(58));

        let now = t(59) + Duration::milliseconds(999);
        let decision = limiter.check_and_consume(&key, 1, now);
        assert_eq!(decision.retry_after_secs, Some(1));
    }

    #[test]
    fn test_retry_after_never_negative() {
        assert_eq!(retry_after_secs(t(0), t(5)), 0);
        assert_eq!(retry_after_secs(t(5), t(5)), 0);
    }

    #[test]
    fn test_zero_quota_denies_every_request() {
        let limiter = limiter(60);
        let key = RateLimitKey::new("BlockedBot", "1.2.3.4");

        let first = limiter.check_and_consume(&key, 0, t(0));
        assert!(!first.allowed);
        assert_eq!(first.remaining, 0);
        assert_eq!(first.retry_after_secs, Some(60));
        assert_eq!(limiter.get_counter_value(&key), Some(0));

        let second = limiter.check_and_consume(&key, 0, t(30));
        assert!(!second.allowed);
        assert_eq!(second.retry_after_secs, Some(30));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(60);
        let a = RateLimitKey::new("TestBot", "1.1.1.1");
        let b = RateLimitKey::new("TestBot", "2.2.2.2");

        assert!(limiter.check_and_consume(&a, 1, t(0)).allowed);
        assert!(!limiter.check_and_consume(&a, 1, t(0)).allowed);
        assert!(limiter.check_and_consume(&b, 1, t(0)).allowed);
    }

    #[test]
    fn test_swept_record_behaves_like_fresh() {
        let limiter = limiter(60);
        let key = RateLimitKey::new("TestBot", "1.2.3.4");
        limiter.check_and_consume(&key, 1, t(0));

        assert_eq!(limiter.sweep(t(200)), 1);
        assert_eq!(limiter.get_counter_value(&key), None);

        let decision = limiter.check_and_consume(&key, 1, t(200));
        assert!(decision.allowed);
        assert_eq!(decision.reset_at, t(260));
    }

    #[test]
    fn test_concurrent_requests_admit_exactly_quota() {
        let limiter = limiter(60);
        let key = RateLimitKey::new("TestBot", "1.2.3.4");
        let quota = 25;
        let admitted = AtomicU64::new(0);
        let denied = AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        if limiter.check_and_consume(&key, quota, t(1)).allowed {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        } else {
                            denied.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), quota);
        assert_eq!(denied.load(Ordering::SeqCst), 160 - quota);
        assert_eq!(limiter.get_counter_value(&key), Some(quota));
    }
}
