//! Background tasks of the gatekeeper

use std::sync::Arc;

use async_trait::async_trait;

use crate::access_list::AccessListManager;
use crate::prelude::*;
use crate::rate_limit::{LoadMonitor, RateLimiter};
use crate::scheduler::PeriodicTask;

/// Pulls the shared-tier blacklist into the durable file
#[derive(Debug)]
pub struct BlacklistSyncTask {
	access: Arc<AccessListManager>,
}

impl BlacklistSyncTask {
	pub fn new(access: Arc<AccessListManager>) -> Arc<Self> {
		Arc::new(Self { access })
	}
}

#[async_trait]
impl PeriodicTask for BlacklistSyncTask {
	fn kind_of(&self) -> &'static str {
		"gatekeeper.blacklist-sync"
	}

	async fn run(&self) -> ClResult<()> {
		self.access.sync_from_shared().await
	}
}

/// Clears the observability stats and idle bucket state
#[derive(Debug)]
pub struct StatsResetTask {
	limiter: Arc<RateLimiter>,
}

impl StatsResetTask {
	pub fn new(limiter: Arc<RateLimiter>) -> Arc<Self> {
		Arc::new(Self { limiter })
	}
}

#[async_trait]
impl PeriodicTask for StatsResetTask {
	fn kind_of(&self) -> &'static str {
		"gatekeeper.stats-reset"
	}

	async fn run(&self) -> ClResult<()> {
		let tracked = self.limiter.stats().len();
		self.limiter.reset_stats();
		debug!("Rate stats reset ({} IPs tracked)", tracked);
		Ok(())
	}
}

/// Samples host resources and resizes the point budget
#[derive(Debug)]
pub struct ResourceSampleTask {
	load: Arc<LoadMonitor>,
	limiter: Arc<RateLimiter>,
}

impl ResourceSampleTask {
	pub fn new(load: Arc<LoadMonitor>, limiter: Arc<RateLimiter>) -> Arc<Self> {
		Arc::new(Self { load, limiter })
	}
}

#[async_trait]
impl PeriodicTask for ResourceSampleTask {
	fn kind_of(&self) -> &'static str {
		"gatekeeper.resource-sample"
	}

	async fn run(&self) -> ClResult<()> {
		if let Some(usage) = self.load.refresh() {
			self.limiter.adjust_for_load(usage);
		}
		Ok(())
	}
}

// vim: ts=4
