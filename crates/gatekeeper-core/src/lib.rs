//! Admission control for Gatekeeper.
//!
//! Decides per request whether a client is allowed, allowed with a warning,
//! delayed, or denied. State is kept in a three-tier store (process-local,
//! shared cache, durable file) so decisions stay consistent across instances
//! and survive partial infrastructure failures.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod access_list;
pub mod config;
pub mod gate;
pub mod prelude;
pub mod rate_limit;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod test_support;

pub use access_list::{AccessListManager, BlacklistStatus, Verdict};
pub use config::GatekeeperConfig;
pub use gate::{
	Decision, DenyReason, GateLayer, Gatekeeper, GatekeeperBuilder, ServerMode, SessionState,
	Warning,
};
pub use rate_limit::{RateLimitDecision, RateLimitRecord, RateLimiter};
pub use store::{Lookup, TieredStore};

// vim: ts=4
