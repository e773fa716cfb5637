//! Adapter trait for the durable (disaster-recovery) tier.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

#[async_trait]
pub trait DurableStore: Debug + Send + Sync {
	/// Loads the stored document for a key. A key that was never persisted
	/// is `Ok(None)`.
	async fn load(&self, key: &str) -> ClResult<Option<Box<str>>>;

	/// Replaces the stored document for a key.
	///
	/// Implementations must serialize concurrent writers so a document is
	/// never observed half-written.
	async fn persist(&self, key: &str, document: &str) -> ClResult<()>;
}

// vim: ts=4
