//! Adapter trait for the shared network cache tier.
//!
//! The shared tier is the authoritative, cross-instance state (Redis or an
//! equivalent). Values are opaque strings; the core encodes them as JSON.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

use crate::prelude::*;

/// A value read from the shared tier together with its remaining lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
	pub value: Box<str>,
	/// Remaining time to live; `None` if the key never expires
	pub ttl: Option<Duration>,
}

#[async_trait]
pub trait SharedCache: Debug + Send + Sync {
	/// Reads a key. A missing or expired key is `Ok(None)`.
	async fn get(&self, key: &str) -> ClResult<Option<CachedValue>>;

	/// Writes a key, replacing any previous value and expiry.
	/// `ttl: None` stores the key without expiry.
	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()>;

	/// Removes a key. Removing a missing key succeeds.
	async fn del(&self, key: &str) -> ClResult<()>;

	/// Backend name for logging
	fn backend(&self) -> &'static str;
}

// vim: ts=4
