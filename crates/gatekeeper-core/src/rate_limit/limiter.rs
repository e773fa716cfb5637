//! Rate Limiter
//!
//! Point-budget limiter with escalating soft lockouts. The remaining balance
//! of each IP lives in the tiered store so other instances see it; the first
//! observation of an IP in a window is answered by a local governor bucket.
//! The point budget shrinks globally while the host is under load.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use gatekeeper_types::resource::ResourceUsage;

use super::backoff::BackoffTracker;
use super::stats::GlobalRateStats;
use crate::config::GatekeeperConfig;
use crate::prelude::*;

const NAMESPACE: &str = "gatekeeper";

type KeyedLimiter =
	GovernorLimiter<Box<str>, DashMapStateStore<Box<str>>, DefaultClock, StateInformationMiddleware>;

/// Remaining balance of an IP in its current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
	pub ip: Box<str>,
	pub remaining_points: u32,
	pub window_duration_seconds: u64,
}

/// Outcome of a single rate limit check
#[derive(Debug)]
pub enum RateLimitDecision {
	/// Request proceeds
	Allowed { remaining: u32 },
	/// Request proceeds, balance nearly exhausted
	Warning { remaining: u32 },
	/// Balance was exhausted: the IP got a fresh balance under a longer window
	BackoffApplied { multiplier: u32, window: Duration },
	/// The store failed; the request proceeds unchecked
	Unrestricted(Error),
}

impl RateLimitDecision {
	pub fn is_warning(&self) -> bool {
		matches!(self, RateLimitDecision::Warning { .. } | RateLimitDecision::BackoffApplied { .. })
	}
}

fn record_key(ip: &str) -> String {
	format!("rateLimit_{}", ip)
}

fn build_bucket(points: NonZeroU32, duration: Duration) -> Arc<KeyedLimiter> {
	let quota = Quota::with_period(duration / points.get())
		.unwrap_or_else(|| Quota::per_second(points))
		.allow_burst(points);
	Arc::new(GovernorLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>())
}

pub struct RateLimiter {
	store: Arc<TieredStore>,
	backoff: BackoffTracker,
	stats: GlobalRateStats,
	bucket: RwLock<Arc<KeyedLimiter>>,
	base_points: NonZeroU32,
	base_duration: Duration,
	effective_points: AtomicU32,
	warning_threshold: u32,
	resource_threshold: f64,
}

impl std::fmt::Debug for RateLimiter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RateLimiter")
			.field("base_points", &self.base_points)
			.field("base_duration", &self.base_duration)
			.field("effective_points", &self.effective_points())
			.finish_non_exhaustive()
	}
}

impl RateLimiter {
	pub fn new(store: Arc<TieredStore>, config: &GatekeeperConfig) -> Self {
		let base_points = config.rate_limiter_base_points;
		let base_duration = config.rate_limiter_base_duration;
		Self {
			backoff: BackoffTracker::new(store.clone(), config.backoff_reset_after),
			store,
			stats: GlobalRateStats::new(),
			bucket: RwLock::new(build_bucket(base_points, base_duration)),
			base_points,
			base_duration,
			effective_points: AtomicU32::new(base_points.get()),
			warning_threshold: config.warning_threshold,
			resource_threshold: config.resource_threshold_percent,
		}
	}

	pub fn base_points(&self) -> u32 {
		self.base_points.get()
	}

	/// Point budget currently granted per window
	pub fn effective_points(&self) -> u32 {
		self.effective_points.load(Ordering::Relaxed)
	}

	pub fn stats(&self) -> &GlobalRateStats {
		&self.stats
	}

	pub fn backoff(&self) -> &BackoffTracker {
		&self.backoff
	}

	/// Consume one point for an IP and classify the request
	pub async fn check(&self, ip: &str) -> RateLimitDecision {
		let points = self.effective_points();

		let stored = match self.store.get::<RateLimitRecord>(&record_key(ip), NAMESPACE).await {
			Lookup::Found { value, .. } => Some(value),
			Lookup::NotFound => None,
			Lookup::Unavailable(e) => {
				e.report(&format!("rate limit lookup for {}", ip));
				self.stats.update(ip, points);
				return RateLimitDecision::Unrestricted(e);
			}
		};

		let (available, window_secs) = match stored {
			Some(record) => (record.remaining_points.min(points), record.window_duration_seconds),
			None => (self.first_observation(ip, points), self.base_duration.as_secs()),
		};

		if available == 0 {
			return self.apply_backoff(ip, points).await;
		}

		let record = RateLimitRecord {
			ip: ip.into(),
			remaining_points: available - 1,
			window_duration_seconds: window_secs,
		};
		self.stats.update(ip, record.remaining_points);
		if let Err(e) = self.save(&record).await {
			e.report(&format!("rate limit update for {}", ip));
			return RateLimitDecision::Unrestricted(e);
		}

		if available <= self.warning_threshold {
			info!("Rate limit warning for IP {}. Remaining points: {}", ip, record.remaining_points);
			RateLimitDecision::Warning { remaining: record.remaining_points }
		} else {
			RateLimitDecision::Allowed { remaining: record.remaining_points }
		}
	}

	/// Balance of an IP not seen in the store, taken from the local bucket.
	/// Returns the balance before this request's point is taken.
	fn first_observation(&self, ip: &str, points: u32) -> u32 {
		let bucket = self.bucket.read().clone();
		match bucket.check_key(&Box::from(ip)) {
			Ok(snapshot) => snapshot.remaining_burst_capacity().saturating_add(1).min(points),
			Err(_) => 0,
		}
	}

	async fn apply_backoff(&self, ip: &str, points: u32) -> RateLimitDecision {
		let backoff = self.backoff.escalate(ip).await;
		let window = self.base_duration.saturating_mul(backoff.multiplier);
		let record = RateLimitRecord {
			ip: ip.into(),
			remaining_points: points,
			window_duration_seconds: window.as_secs(),
		};
		self.stats.update(ip, points);
		info!(
			"Backoff applied for IP {}: window {}s (multiplier {})",
			ip,
			window.as_secs(),
			backoff.multiplier
		);

		if let Err(e) = self.save(&record).await {
			e.report(&format!("rate limit reset for {}", ip));
			return RateLimitDecision::Unrestricted(e);
		}
		RateLimitDecision::BackoffApplied { multiplier: backoff.multiplier, window }
	}

	async fn save(&self, record: &RateLimitRecord) -> ClResult<()> {
		let ttl = Duration::from_secs(record.window_duration_seconds);
		self.store.set(&record_key(&record.ip), record, NAMESPACE, Some(ttl)).await
	}

	/// Stored record of an IP, if it has one
	pub async fn status(&self, ip: &str) -> Lookup<RateLimitRecord> {
		self.store.get(&record_key(ip), NAMESPACE).await
	}

	/// Forget the balance and backoff of an IP
	pub async fn reset(&self, ip: &str) -> ClResult<()> {
		self.stats.remove(ip);
		self.store.del(&record_key(ip), NAMESPACE).await?;
		self.backoff.reset(ip).await
	}

	/// Resize the point budget from a resource sample. Returns the new budget.
	pub fn adjust_for_load(&self, usage: ResourceUsage) -> u32 {
		let base = self.base_points.get();
		let target = if usage.exceeds(self.resource_threshold) {
			warn!(
				"High resource usage detected. CPU: {:.1}%, Memory: {:.1}%",
				usage.cpu_percent, usage.memory_percent
			);
			(base / 2).max(1)
		} else {
			base
		};

		let previous = self.effective_points.swap(target, Ordering::Relaxed);
		if previous != target {
			info!("Rate limit budget changed from {} to {} points", previous, target);
			if let Some(points) = NonZeroU32::new(target) {
				*self.bucket.write() = build_bucket(points, self.base_duration);
			}
		}
		target
	}

	/// Clear observability stats and drop idle bucket state
	pub fn reset_stats(&self) {
		self.stats.clear();
		let bucket = self.bucket.read().clone();
		bucket.retain_recent();
		bucket.shrink_to_fit();
	}
}


// vim: ts=4
