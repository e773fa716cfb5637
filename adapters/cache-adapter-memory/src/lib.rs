//! Shared tier held in process memory.
//!
//! Stands in for Redis when a single instance serves all traffic. Expired
//! entries are dropped when read and by `purge_expired`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use gatekeeper_types::prelude::*;
use gatekeeper_types::shared_cache::{CachedValue, SharedCache};

#[derive(Debug)]
struct Entry {
	value: Box<str>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}
}

#[derive(Debug, Default)]
pub struct MemoryCache {
	entries: RwLock<HashMap<Box<str>, Entry>>,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Drop every expired entry. Returns how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|_, entry| !entry.is_expired(now));
		let removed = before - entries.len();
		if removed > 0 {
			debug!("Purged {} expired shared cache entries", removed);
		}
		removed
	}
}

#[async_trait]
impl SharedCache for MemoryCache {
	async fn get(&self, key: &str) -> ClResult<Option<CachedValue>> {
		let now = Instant::now();
		{
			let entries = self.entries.read();
			match entries.get(key) {
				None => return Ok(None),
				Some(entry) if !entry.is_expired(now) => {
					return Ok(Some(CachedValue {
						value: entry.value.clone(),
						ttl: entry.expires_at.map(|at| at - now),
					}));
				}
				Some(_) => {}
			}
		}
		self.entries.write().remove(key);
		Ok(None)
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()> {
		let expires_at = ttl.map(|ttl| Instant::now() + ttl);
		self.entries.write().insert(key.into(), Entry { value: value.into(), expires_at });
		Ok(())
	}

	async fn del(&self, key: &str) -> ClResult<()> {
		self.entries.write().remove(key);
		Ok(())
	}

	fn backend(&self) -> &'static str {
		"memory"
	}
}

// vim: ts=4
