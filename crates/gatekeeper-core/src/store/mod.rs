//! Three-tier storage: process-local cache, shared cache, durable store

mod local;
mod tiered;

pub use local::LocalCache;
pub use tiered::{Lookup, StoreMetrics, Tier, TieredStore, TieredStoreOpts};

// vim: ts=4
