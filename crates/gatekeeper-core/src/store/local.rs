//! Process-local cache tier: LRU-bounded, per-entry expiry

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
	value: Box<str>,
	expires_at: Instant,
}

pub struct LocalCache {
	entries: Mutex<LruCache<Box<str>, Entry>>,
	max_ttl: Duration,
}

impl LocalCache {
	pub fn new(capacity: NonZeroUsize, max_ttl: Duration) -> Self {
		Self { entries: Mutex::new(LruCache::new(capacity)), max_ttl }
	}

	/// Returns a live entry; expired entries are dropped
	pub fn get(&self, key: &str) -> Option<Box<str>> {
		let mut entries = self.entries.lock();
		let expired = match entries.get(key) {
			Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
			Some(_) => true,
			None => false,
		};
		if expired {
			entries.pop(key);
		}
		None
	}

	/// Stores a value. The TTL is capped at the cache's maximum; `None`
	/// uses the maximum.
	pub fn set(&self, key: &str, value: Box<str>, ttl: Option<Duration>) {
		let ttl = ttl.map_or(self.max_ttl, |ttl| ttl.min(self.max_ttl));
		if ttl.is_zero() {
			self.entries.lock().pop(key);
			return;
		}
		let entry = Entry { value, expires_at: Instant::now() + ttl };
		self.entries.lock().put(key.into(), entry);
	}

	pub fn remove(&self, key: &str) {
		self.entries.lock().pop(key);
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}


// vim: ts=4
