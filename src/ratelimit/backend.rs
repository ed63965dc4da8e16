//! Rate limiter trait for abstracting the counter backend.

use chrono::{DateTime, Utc};

use super::key::RateLimitKey;
use super::limiter::AdmissionDecision;

/// Trait for rate limiter implementations.
///
/// The HTTP filter depends on this trait rather than on `WindowLimiter`
/// directly. Implementations must decide synchronously and never block.
pub trait RateLimiterBackend: Send + Sync {
    /// Record one request for `key` and decide whether it is admitted.
    fn check_and_consume(
        &self,
        key: &RateLimitKey,
        quota: u64,
        now: DateTime<Utc>,
    ) -> AdmissionDecision;
}
