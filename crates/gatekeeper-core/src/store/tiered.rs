//! Tiered Store
//!
//! Read/write-through access over three tiers of increasing durability:
//! the process-local cache, the shared network cache, and the durable file
//! store. Reads fall through local → shared → durable and backfill the faster
//! tiers on a hit; the durable tier is only consulted for keys registered as
//! durable. Writes go to local and shared; the durable tier is written only by
//! an explicit `persist`.
//!
//! Tier failures never escape as faults: lookups report them as
//! `Lookup::Unavailable` after every fallback was tried, writes return the
//! error after the remaining tiers were updated.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use gatekeeper_types::durable_store::DurableStore;
use gatekeeper_types::shared_cache::SharedCache;

use super::local::LocalCache;
use crate::prelude::*;

/// Storage tier that produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
	Local,
	Shared,
	Durable,
}

impl Tier {
	pub fn name(&self) -> &'static str {
		match self {
			Tier::Local => "local",
			Tier::Shared => "shared",
			Tier::Durable => "durable",
		}
	}
}

/// Result of a tiered read
#[derive(Debug)]
pub enum Lookup<T> {
	Found { value: T, tier: Tier },
	/// Every consulted tier answered and none held the key
	NotFound,
	/// At least one tier failed and no later tier produced a value
	Unavailable(Error),
}

impl<T> Lookup<T> {
	pub fn value(self) -> Option<T> {
		match self {
			Lookup::Found { value, .. } => Some(value),
			Lookup::NotFound | Lookup::Unavailable(_) => None,
		}
	}

	pub fn is_found(&self) -> bool {
		matches!(self, Lookup::Found { .. })
	}

	pub fn tier(&self) -> Option<Tier> {
		match self {
			Lookup::Found { tier, .. } => Some(*tier),
			Lookup::NotFound | Lookup::Unavailable(_) => None,
		}
	}
}

/// Per-namespace read counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
	pub local_hits: u64,
	pub shared_hits: u64,
	pub durable_hits: u64,
	pub misses: u64,
}

#[derive(Debug, Clone)]
pub struct TieredStoreOpts {
	pub local_capacity: NonZeroUsize,
	pub local_max_ttl: Duration,
	/// Bound for each shared tier call
	pub shared_timeout: Duration,
	/// Bound for each durable tier call; covers a full file write and sync
	pub durable_timeout: Duration,
}

pub struct TieredStore {
	local: LocalCache,
	shared: Arc<dyn SharedCache>,
	durable: Option<Arc<dyn DurableStore>>,
	durable_keys: HashSet<Box<str>>,
	shared_timeout: Duration,
	durable_timeout: Duration,
	metrics: Mutex<HashMap<Box<str>, StoreMetrics>>,
}

fn namespaced(namespace: &str, key: &str) -> String {
	format!("{}:{}", namespace, key)
}

fn encode<T: Serialize>(value: &T) -> ClResult<Box<str>> {
	Ok(serde_json::to_string(value)?.into_boxed_str())
}

fn decode<T: DeserializeOwned>(raw: &str) -> ClResult<T> {
	Ok(serde_json::from_str(raw)?)
}

impl std::fmt::Debug for TieredStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TieredStore")
			.field("shared", &self.shared.backend())
			.field("durable", &self.durable.is_some())
			.field("local_len", &self.local.len())
			.finish_non_exhaustive()
	}
}

impl TieredStore {
	pub fn new(
		shared: Arc<dyn SharedCache>,
		durable: Option<Arc<dyn DurableStore>>,
		opts: TieredStoreOpts,
	) -> Self {
		Self {
			local: LocalCache::new(opts.local_capacity, opts.local_max_ttl),
			shared,
			durable,
			durable_keys: HashSet::new(),
			shared_timeout: opts.shared_timeout,
			durable_timeout: opts.durable_timeout,
			metrics: Mutex::new(HashMap::new()),
		}
	}

	/// Register a key whose reads may fall back to the durable tier
	pub fn with_durable_key(mut self, key: &str, namespace: &str) -> Self {
		self.durable_keys.insert(namespaced(namespace, key).into());
		self
	}

	pub fn is_durable(&self, key: &str, namespace: &str) -> bool {
		self.durable_keys.contains(namespaced(namespace, key).as_str())
	}

	pub fn metrics(&self, namespace: &str) -> StoreMetrics {
		self.metrics.lock().get(namespace).copied().unwrap_or_default()
	}

	fn count(&self, namespace: &str, hit: Option<Tier>) {
		let mut metrics = self.metrics.lock();
		let entry = metrics.entry(namespace.into()).or_default();
		match hit {
			Some(Tier::Local) => entry.local_hits += 1,
			Some(Tier::Shared) => entry.shared_hits += 1,
			Some(Tier::Durable) => entry.durable_hits += 1,
			None => entry.misses += 1,
		}
	}

	async fn bounded<T, F>(&self, tier: Tier, fut: F) -> ClResult<T>
	where
		F: Future<Output = ClResult<T>>,
	{
		let limit = match tier {
			Tier::Durable => self.durable_timeout,
			Tier::Local | Tier::Shared => self.shared_timeout,
		};
		tokio::time::timeout(limit, fut)
			.await
			.map_err(|_| Error::Timeout { tier: tier.name() })?
	}

	/// Read a value, falling through local → shared → durable.
	pub async fn get<T: DeserializeOwned>(&self, key: &str, namespace: &str) -> Lookup<T> {
		let full_key = namespaced(namespace, key);

		if let Some(raw) = self.local.get(&full_key) {
			match decode(&raw) {
				Ok(value) => {
					self.count(namespace, Some(Tier::Local));
					return Lookup::Found { value, tier: Tier::Local };
				}
				Err(e) => {
					e.report(&format!("local tier value for {}", full_key));
					self.local.remove(&full_key);
				}
			}
		}

		let mut failure = None;
		let mut shared_ok = true;
		match self.bounded(Tier::Shared, self.shared.get(&full_key)).await {
			Ok(Some(cached)) => match decode(&cached.value) {
				Ok(value) => {
					self.local.set(&full_key, cached.value, cached.ttl);
					self.count(namespace, Some(Tier::Shared));
					debug!("Shared tier hit for {}, backfilled local tier", full_key);
					return Lookup::Found { value, tier: Tier::Shared };
				}
				Err(e) => {
					e.report(&format!("shared tier value for {}", full_key));
					failure = Some(e);
				}
			},
			Ok(None) => {}
			Err(e) => {
				e.report(&format!("shared tier read of {}", full_key));
				shared_ok = false;
				failure = Some(e);
			}
		}

		let durable =
			self.durable.as_ref().filter(|_| self.durable_keys.contains(full_key.as_str()));
		if let Some(durable) = durable {
			match self.bounded(Tier::Durable, durable.load(&full_key)).await {
				Ok(Some(document)) => match decode(&document) {
					Ok(value) => {
						self.local.set(&full_key, document.clone(), None);
						if shared_ok {
							if let Err(e) = self
								.bounded(Tier::Shared, self.shared.set(&full_key, &document, None))
								.await
							{
								e.report(&format!("shared tier backfill of {}", full_key));
							}
						}
						self.count(namespace, Some(Tier::Durable));
						info!("Loaded {} from durable tier, backfilled caches", full_key);
						return Lookup::Found { value, tier: Tier::Durable };
					}
					Err(e) => {
						e.report(&format!("durable tier document for {}", full_key));
						failure = Some(e);
					}
				},
				Ok(None) => {}
				Err(e) => {
					e.report(&format!("durable tier read of {}", full_key));
					failure = Some(e);
				}
			}
		}

		self.count(namespace, None);
		match failure {
			Some(e) => Lookup::Unavailable(e),
			None => Lookup::NotFound,
		}
	}

	/// Write a value to the local and shared tiers.
	///
	/// The local tier is always updated; a shared tier failure is returned
	/// after that so the caller can log it and carry on.
	pub async fn set<T: Serialize>(
		&self,
		key: &str,
		value: &T,
		namespace: &str,
		ttl: Option<Duration>,
	) -> ClResult<()> {
		let full_key = namespaced(namespace, key);
		let raw = encode(value)?;
		self.local.set(&full_key, raw.clone(), ttl);
		self.bounded(Tier::Shared, self.shared.set(&full_key, &raw, ttl)).await
	}

	/// Overwrite the process-local copy of a key, leaving the other tiers alone
	pub fn set_local<T: Serialize>(
		&self,
		key: &str,
		value: &T,
		namespace: &str,
		ttl: Option<Duration>,
	) -> ClResult<()> {
		let full_key = namespaced(namespace, key);
		self.local.set(&full_key, encode(value)?, ttl);
		Ok(())
	}

	/// Remove a key from the local and shared tiers
	pub async fn del(&self, key: &str, namespace: &str) -> ClResult<()> {
		let full_key = namespaced(namespace, key);
		self.local.remove(&full_key);
		self.bounded(Tier::Shared, self.shared.del(&full_key)).await
	}

	/// Write a value to the durable tier only
	pub async fn persist<T: Serialize>(&self, key: &str, value: &T, namespace: &str) -> ClResult<()> {
		let Some(durable) = &self.durable else {
			return Err(Error::unavailable("durable", "no durable store configured"));
		};
		let full_key = namespaced(namespace, key);
		let raw = encode(value)?;
		self.bounded(Tier::Durable, durable.persist(&full_key, &raw)).await
	}

	/// Read a value straight from the durable tier, bypassing the caches
	pub async fn load_durable<T: DeserializeOwned>(&self, key: &str, namespace: &str) -> Lookup<T> {
		let Some(durable) = &self.durable else {
			return Lookup::NotFound;
		};
		let full_key = namespaced(namespace, key);
		match self.bounded(Tier::Durable, durable.load(&full_key)).await {
			Ok(Some(document)) => match decode(&document) {
				Ok(value) => Lookup::Found { value, tier: Tier::Durable },
				Err(e) => Lookup::Unavailable(e),
			},
			Ok(None) => Lookup::NotFound,
			Err(e) => Lookup::Unavailable(e),
		}
	}

	/// Read a key that lives only in the shared tier (no local caching)
	pub async fn get_shared<T: DeserializeOwned>(&self, key: &str, namespace: &str) -> Lookup<T> {
		let full_key = namespaced(namespace, key);
		match self.bounded(Tier::Shared, self.shared.get(&full_key)).await {
			Ok(Some(cached)) => match decode(&cached.value) {
				Ok(value) => Lookup::Found { value, tier: Tier::Shared },
				Err(e) => Lookup::Unavailable(e),
			},
			Ok(None) => Lookup::NotFound,
			Err(e) => Lookup::Unavailable(e),
		}
	}

	/// Write a key to the shared tier only
	pub async fn set_shared<T: Serialize>(
		&self,
		key: &str,
		value: &T,
		namespace: &str,
		ttl: Option<Duration>,
	) -> ClResult<()> {
		let full_key = namespaced(namespace, key);
		let raw = encode(value)?;
		self.bounded(Tier::Shared, self.shared.set(&full_key, &raw, ttl)).await
	}

	/// Remove a key from the shared tier only
	pub async fn del_shared(&self, key: &str, namespace: &str) -> ClResult<()> {
		let full_key = namespaced(namespace, key);
		self.bounded(Tier::Shared, self.shared.del(&full_key)).await
	}

	pub fn local_len(&self) -> usize {
		self.local.len()
	}
}


// vim: ts=4
