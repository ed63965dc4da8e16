//! Crawler classification, per-key counters and fixed-window admission.

mod backend;
mod clock;
mod counter;
mod key;
mod limiter;
mod registry;
mod sweeper;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, MockClock, SystemClock};
pub use counter::{CounterRecord, CounterStore};
pub use key::{RateLimitKey, UNKNOWN_ADDRESS};
pub use limiter::{AdmissionDecision, WindowLimiter};
pub use registry::{Identity, IdentityRegistry, IdentityRule, QUOTA_ENV_PREFIX};
pub use sweeper::SweepTask;
