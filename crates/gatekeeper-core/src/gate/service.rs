//! Gatekeeper service
//!
//! Owns the store, the limiter, the access lists and the background tasks,
//! and runs the per-request decision pipeline:
//!
//! 1. whitelist → allow, temporary ban / blacklist → deny
//! 2. rate limit: consume a point, warn when nearly exhausted
//! 3. slowdown: per-session spacing, answered with a delay
//! 4. load shedding: deny while the host is overloaded

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use gatekeeper_types::durable_store::DurableStore;
use gatekeeper_types::resource::ResourceSampler;
use gatekeeper_types::shared_cache::SharedCache;

use super::decision::{Decision, DenyReason, Warning};
use super::slowdown::{SessionState, SlowdownCheck};
use super::tasks::{BlacklistSyncTask, ResourceSampleTask, StatsResetTask};
use crate::access_list::{self, AccessListManager, BlacklistStatus, Verdict};
use crate::config::GatekeeperConfig;
use crate::prelude::*;
use crate::rate_limit::{LoadMonitor, RateLimitDecision, RateLimitRecord, RateLimiter};
use crate::scheduler::Scheduler;
use crate::store::TieredStoreOpts;

fn parse_ip(ip: &str) -> ClResult<IpAddr> {
	ip.trim().parse::<IpAddr>().map_err(|_| Error::Malformed(format!("invalid IP address: {}", ip)))
}

#[derive(Default)]
pub struct GatekeeperBuilder {
	config: Option<GatekeeperConfig>,
	shared_cache: Option<Arc<dyn SharedCache>>,
	durable_store: Option<Arc<dyn DurableStore>>,
	resource_sampler: Option<Arc<dyn ResourceSampler>>,
}

impl GatekeeperBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn config(&mut self, config: GatekeeperConfig) -> &mut Self {
		self.config = Some(config);
		self
	}
	pub fn shared_cache(&mut self, shared_cache: Arc<dyn SharedCache>) -> &mut Self {
		self.shared_cache = Some(shared_cache);
		self
	}
	pub fn durable_store(&mut self, durable_store: Arc<dyn DurableStore>) -> &mut Self {
		self.durable_store = Some(durable_store);
		self
	}
	pub fn resource_sampler(&mut self, resource_sampler: Arc<dyn ResourceSampler>) -> &mut Self {
		self.resource_sampler = Some(resource_sampler);
		self
	}

	pub fn build(&mut self) -> ClResult<Gatekeeper> {
		let Some(config) = self.config.take() else {
			error!("FATAL: No gatekeeper configuration");
			return Err(Error::ConfigError("no configuration".into()));
		};
		config.validate()?;
		let Some(shared_cache) = self.shared_cache.take() else {
			error!("FATAL: No shared cache configured");
			return Err(Error::ConfigError("no shared cache configured".into()));
		};
		let Some(durable_store) = self.durable_store.take() else {
			error!("FATAL: No durable store configured");
			return Err(Error::ConfigError("no durable store configured".into()));
		};
		let Some(resource_sampler) = self.resource_sampler.take() else {
			error!("FATAL: No resource sampler configured");
			return Err(Error::ConfigError("no resource sampler configured".into()));
		};

		let store = Arc::new(
			TieredStore::new(
				shared_cache,
				Some(durable_store),
				TieredStoreOpts {
					local_capacity: config.local_cache_capacity,
					local_max_ttl: config.local_cache_ttl,
					shared_timeout: config.store_timeout,
					durable_timeout: config.durable_timeout,
				},
			)
			.with_durable_key(access_list::BLACKLIST_KEY, access_list::NAMESPACE),
		);

		let limiter = Arc::new(RateLimiter::new(store.clone(), &config));
		let access = Arc::new(AccessListManager::new(
			store.clone(),
			config.ip_whitelist.clone(),
			config.temporary_ban_ttl,
		));
		let load = Arc::new(LoadMonitor::new(resource_sampler, config.load_shed_threshold_percent));

		Ok(Gatekeeper {
			slowdown: SlowdownCheck::new(config.slowdown_threshold),
			config,
			store,
			limiter,
			access,
			load,
			scheduler: Scheduler::new(),
			started: AtomicBool::new(false),
			stopped: AtomicBool::new(false),
		})
	}
}

#[derive(Debug)]
pub struct Gatekeeper {
	config: GatekeeperConfig,
	store: Arc<TieredStore>,
	limiter: Arc<RateLimiter>,
	access: Arc<AccessListManager>,
	load: Arc<LoadMonitor>,
	slowdown: SlowdownCheck,
	scheduler: Scheduler,
	started: AtomicBool,
	stopped: AtomicBool,
}

impl Gatekeeper {
	pub fn builder() -> GatekeeperBuilder {
		GatekeeperBuilder::new()
	}

	/// Load the access lists and take a first resource sample.
	///
	/// Storage problems are logged and never fail initialization.
	pub async fn initialize(&self) -> ClResult<()> {
		info!("Initializing gatekeeper");
		let entries = self.access.initialize().await;
		info!("Blacklist ready with {} entries", entries);

		if let Some(usage) = self.load.refresh() {
			self.limiter.adjust_for_load(usage);
		}

		if let Err(e) = self.access.sync_from_shared().await {
			e.report("initial blacklist sync");
		}
		info!(
			"Gatekeeper initialized: {} points per {}s",
			self.limiter.effective_points(),
			self.config.rate_limiter_base_duration.as_secs()
		);
		Ok(())
	}

	/// Start the background tasks. Calling it again is a no-op.
	pub fn start(&self) {
		if self.started.swap(true, Ordering::SeqCst) {
			warn!("Gatekeeper already started");
			return;
		}
		self.scheduler.spawn(
			BlacklistSyncTask::new(self.access.clone()),
			self.config.blacklist_sync_interval,
		);
		self.scheduler
			.spawn(StatsResetTask::new(self.limiter.clone()), self.config.stats_reset_interval);
		self.scheduler.spawn(
			ResourceSampleTask::new(self.load.clone(), self.limiter.clone()),
			self.config.resource_sample_interval,
		);
	}

	/// Stop the background tasks and drop in-process stats. Idempotent.
	pub async fn shutdown(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			debug!("Gatekeeper already shut down");
			return;
		}
		info!("Shutting down gatekeeper: stopping background tasks");
		self.scheduler.shutdown().await;
		info!("Shutting down gatekeeper: clearing rate stats");
		self.limiter.stats().clear();
		info!("Gatekeeper shut down");
	}

	/// Run the decision pipeline for a textual client address
	pub async fn check(&self, ip: &str, session: Option<&mut SessionState>) -> ClResult<Decision> {
		Ok(self.check_addr(parse_ip(ip)?, session).await)
	}

	/// Run the decision pipeline for a client address
	pub async fn check_addr(&self, ip: IpAddr, session: Option<&mut SessionState>) -> Decision {
		match session {
			Some(session) => {
				self.check_addr_with(ip, |slowdown, now| slowdown.evaluate(session, now)).await
			}
			None => self.check_addr_with(ip, |_, _| None).await,
		}
	}

	/// Run the decision pipeline, asking `spacing` for the slowdown delay.
	///
	/// `spacing` is called at most once, without any await in between its
	/// start and end, so a caller can evaluate session state under its own
	/// lock. It is not called for denied or whitelisted clients.
	pub async fn check_addr_with<F>(&self, ip: IpAddr, spacing: F) -> Decision
	where
		F: FnOnce(&SlowdownCheck, Instant) -> Option<Duration>,
	{
		let ip = ip.to_canonical();

		match self.access.check(&ip).await {
			Verdict::Whitelisted => return Decision::Allow,
			Verdict::TemporarilyBanned => {
				info!("Denied temporarily banned IP {}", ip);
				return Decision::Deny(DenyReason::TemporarilyBlacklisted);
			}
			Verdict::Blacklisted => {
				info!("Denied blacklisted IP {}", ip);
				return Decision::Deny(DenyReason::Blacklisted);
			}
			Verdict::Unlisted => {}
		}

		let rate = self.limiter.check(&ip.to_string()).await;

		let delay = spacing(&self.slowdown, Instant::now());

		if self.load.should_shed() {
			warn!("Shedding request from {}: host overloaded", ip);
			return Decision::Deny(DenyReason::Overloaded);
		}

		if let Some(delay) = delay {
			debug!("Delaying request from {} by {}ms", ip, delay.as_millis());
			return Decision::Delay(delay);
		}

		match rate {
			RateLimitDecision::Allowed { .. } | RateLimitDecision::Unrestricted(_) => Decision::Allow,
			RateLimitDecision::Warning { remaining } => {
				Decision::AllowWithWarning(Warning::NearlyExhausted { remaining })
			}
			RateLimitDecision::BackoffApplied { multiplier, window } => {
				Decision::AllowWithWarning(Warning::BackoffApplied { multiplier, window })
			}
		}
	}

	// Administrative operations
	//***************************

	pub async fn add_to_blacklist(&self, entry: &str) -> ClResult<bool> {
		self.access.add(entry).await
	}

	pub async fn remove_from_blacklist(&self, entry: &str) -> ClResult<bool> {
		self.access.remove(entry).await
	}

	/// Ban an IP in the shared tier. `None` uses the configured TTL.
	pub async fn temporary_ban(&self, ip: &str, ttl: Option<Duration>) -> ClResult<()> {
		self.access.temporary_ban(&parse_ip(ip)?, ttl).await
	}

	pub async fn lift_temporary_ban(&self, ip: &str) -> ClResult<()> {
		self.access.lift_temporary_ban(&parse_ip(ip)?).await
	}

	pub async fn is_blacklisted(&self, ip: &str) -> ClResult<bool> {
		Ok(self.access.is_blacklisted(&parse_ip(ip)?).await)
	}

	pub async fn is_blacklisted_or_temporarily_blacklisted(
		&self,
		ip: &str,
	) -> ClResult<BlacklistStatus> {
		Ok(self.access.status(&parse_ip(ip)?).await)
	}

	pub fn list_blacklist(&self) -> Vec<String> {
		self.access.list_blacklist()
	}

	pub async fn rate_limit_status(&self, ip: &str) -> ClResult<Option<RateLimitRecord>> {
		let ip = parse_ip(ip)?.to_canonical();
		match self.limiter.status(&ip.to_string()).await {
			Lookup::Found { value, .. } => Ok(Some(value)),
			Lookup::NotFound => Ok(None),
			Lookup::Unavailable(e) => Err(e),
		}
	}

	pub async fn reset_rate_limit(&self, ip: &str) -> ClResult<()> {
		let ip = parse_ip(ip)?.to_canonical();
		self.limiter.reset(&ip.to_string()).await
	}

	// Accessors
	//***********

	pub fn config(&self) -> &GatekeeperConfig {
		&self.config
	}

	pub fn store(&self) -> &Arc<TieredStore> {
		&self.store
	}

	pub fn limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	pub fn access_list(&self) -> &Arc<AccessListManager> {
		&self.access
	}

	pub fn load_monitor(&self) -> &Arc<LoadMonitor> {
		&self.load
	}

	pub fn is_running(&self) -> bool {
		self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
	}
}


// vim: ts=4
