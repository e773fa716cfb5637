//! Shared types, tier adapter traits, and core utilities for Gatekeeper.
//!
//! This crate holds the pieces shared between the core admission-control
//! logic and the storage adapters, so adapter crates can compile without
//! pulling in the decision pipeline.

pub mod address;
pub mod durable_store;
pub mod error;
pub mod prelude;
pub mod resource;
pub mod shared_cache;

// vim: ts=4
