//! Rate limiting: point budgets, escalating backoff, and load adaptation

mod backoff;
mod limiter;
mod load;
mod stats;

pub use backoff::{BackoffRecord, BackoffTracker};
pub use limiter::{RateLimitDecision, RateLimitRecord, RateLimiter};
pub use load::LoadMonitor;
pub use stats::GlobalRateStats;

// vim: ts=4
