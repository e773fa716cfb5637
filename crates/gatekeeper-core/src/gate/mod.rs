//! Request gating: the decision pipeline and its HTTP adapter

mod decision;
mod extractors;
mod middleware;
mod service;
mod slowdown;
mod tasks;

pub use decision::{Decision, DenyReason, Warning};
pub use extractors::{extract_client_ip, extract_session_id, ServerMode};
pub use middleware::{GateLayer, GateService, DEFAULT_SESSION_HEADER, WARNING_HEADER};
pub use service::{Gatekeeper, GatekeeperBuilder};
pub use slowdown::{SessionState, SlowdownCheck};
pub use tasks::{BlacklistSyncTask, ResourceSampleTask, StatsResetTask};

// vim: ts=4
