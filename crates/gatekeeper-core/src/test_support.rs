//! In-crate tier fakes for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use gatekeeper_types::durable_store::DurableStore;
use gatekeeper_types::resource::{ResourceSampler, ResourceUsage};
use gatekeeper_types::shared_cache::{CachedValue, SharedCache};

use crate::prelude::*;

/// Shared tier fake that can be switched to failing or slow
#[derive(Debug, Default)]
pub struct FakeShared {
	entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
	failing: AtomicBool,
	delay: Mutex<Option<Duration>>,
}

impl FakeShared {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn put(&self, key: &str, value: &str) {
		self.entries.lock().insert(key.to_string(), (value.to_string(), None));
	}

	pub fn raw(&self, key: &str) -> Option<String> {
		self.entries.lock().get(key).map(|(v, _)| v.clone())
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock() = Some(delay);
	}

	async fn gate(&self) -> ClResult<()> {
		let delay = *self.delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::unavailable("shared", "connection refused"));
		}
		Ok(())
	}
}

#[async_trait]
impl SharedCache for FakeShared {
	async fn get(&self, key: &str) -> ClResult<Option<CachedValue>> {
		self.gate().await?;
		let now = Instant::now();
		let entries = self.entries.lock();
		Ok(entries.get(key).and_then(|(value, expires_at)| match expires_at {
			Some(at) if *at <= now => None,
			Some(at) => Some(CachedValue { value: value.as_str().into(), ttl: Some(*at - now) }),
			None => Some(CachedValue { value: value.as_str().into(), ttl: None }),
		}))
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()> {
		self.gate().await?;
		let expires_at = ttl.map(|ttl| Instant::now() + ttl);
		self.entries.lock().insert(key.to_string(), (value.to_string(), expires_at));
		Ok(())
	}

	async fn del(&self, key: &str) -> ClResult<()> {
		self.gate().await?;
		self.entries.lock().remove(key);
		Ok(())
	}

	fn backend(&self) -> &'static str {
		"fake"
	}
}

#[derive(Debug, Default)]
pub struct FakeDurable {
	documents: Mutex<HashMap<String, String>>,
	failing: AtomicBool,
	delay: Mutex<Option<Duration>>,
}

impl FakeDurable {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn put(&self, key: &str, document: &str) {
		self.documents.lock().insert(key.to_string(), document.to_string());
	}

	pub fn raw(&self, key: &str) -> Option<String> {
		self.documents.lock().get(key).cloned()
	}

	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock() = Some(delay);
	}

	async fn gate(&self) -> ClResult<()> {
		let delay = *self.delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::Io(std::io::Error::other("disk gone")));
		}
		Ok(())
	}
}

#[async_trait]
impl DurableStore for FakeDurable {
	async fn load(&self, key: &str) -> ClResult<Option<Box<str>>> {
		self.gate().await?;
		Ok(self.documents.lock().get(key).map(|d| d.as_str().into()))
	}

	async fn persist(&self, key: &str, document: &str) -> ClResult<()> {
		self.gate().await?;
		self.documents.lock().insert(key.to_string(), document.to_string());
		Ok(())
	}
}

/// Sampler returning whatever was last set
#[derive(Debug, Default)]
pub struct FixedSampler {
	usage: Mutex<ResourceUsage>,
}

impl FixedSampler {
	pub fn new(cpu_percent: f64, memory_percent: f64) -> Arc<Self> {
		Arc::new(Self { usage: Mutex::new(ResourceUsage::new(cpu_percent, memory_percent)) })
	}

	pub fn set(&self, cpu_percent: f64, memory_percent: f64) {
		*self.usage.lock() = ResourceUsage::new(cpu_percent, memory_percent);
	}
}

impl ResourceSampler for FixedSampler {
	fn sample(&self) -> ClResult<ResourceUsage> {
		Ok(*self.usage.lock())
	}
}

// vim: ts=4
