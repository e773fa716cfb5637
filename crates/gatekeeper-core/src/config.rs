//! Gatekeeper Configuration
//!
//! Typed configuration, read once at startup from the environment and
//! validated. Missing limiter parameters are fatal: without them no admission
//! policy can be computed.

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::time::Duration;

use gatekeeper_types::address::AddressPattern;

use crate::prelude::*;

/// Complete admission-control configuration
#[derive(Clone, Debug)]
pub struct GatekeeperConfig {
	// Rate limiter
	/// Points granted per window
	pub rate_limiter_base_points: NonZeroU32,
	/// Base window length
	pub rate_limiter_base_duration: Duration,
	/// A read balance at or below this triggers a warning decision
	pub warning_threshold: u32,
	/// Backoff records expire after this long without a new exhaustion.
	/// `None` (the default) keeps them forever.
	pub backoff_reset_after: Option<Duration>,

	// Access lists
	/// Static whitelist (IP or CIDR)
	pub ip_whitelist: Vec<AddressPattern>,
	/// Durable blacklist file (JSON array of IP/CIDR strings)
	pub blacklist_file: PathBuf,
	/// Default lifetime of a temporary ban
	pub temporary_ban_ttl: Duration,

	// Slowdown and load shedding
	/// Minimum spacing between requests of one session; zero disables
	pub slowdown_threshold: Duration,
	/// CPU or memory above this halves the point budget
	pub resource_threshold_percent: f64,
	/// CPU or memory above this sheds load; `None` disables
	pub load_shed_threshold_percent: Option<f64>,

	// Background tasks
	pub blacklist_sync_interval: Duration,
	pub stats_reset_interval: Duration,
	pub resource_sample_interval: Duration,

	// Tiered store
	/// Upper bound for a single shared tier call
	pub store_timeout: Duration,
	/// Upper bound for a single durable tier call
	pub durable_timeout: Duration,
	pub local_cache_capacity: NonZeroUsize,
	/// Longest time a value stays in the process-local tier
	pub local_cache_ttl: Duration,
}

impl GatekeeperConfig {
	/// Configuration with the given limiter parameters and defaults for the rest
	pub fn new(base_points: NonZeroU32, base_duration: Duration) -> Self {
		const TEN_THOUSAND: NonZeroUsize = match NonZeroUsize::new(10_000) {
			Some(v) => v,
			None => unreachable!(),
		};
		Self {
			rate_limiter_base_points: base_points,
			rate_limiter_base_duration: base_duration,
			warning_threshold: 2,
			backoff_reset_after: None,
			ip_whitelist: Vec::new(),
			blacklist_file: PathBuf::from("./data/ip-blacklist.json"),
			temporary_ban_ttl: Duration::from_secs(3600),
			slowdown_threshold: Duration::ZERO,
			resource_threshold_percent: 80.0,
			load_shed_threshold_percent: None,
			blacklist_sync_interval: Duration::from_millis(3_600_000),
			stats_reset_interval: Duration::from_millis(60_000),
			resource_sample_interval: Duration::from_millis(10_000),
			store_timeout: Duration::from_millis(250),
			durable_timeout: Duration::from_millis(5000),
			local_cache_capacity: TEN_THOUSAND,
			local_cache_ttl: Duration::from_secs(3600),
		}
	}

	/// Read configuration from process environment variables
	pub fn from_env() -> ClResult<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Read configuration through a lookup function (name -> value)
	pub fn from_lookup<F>(lookup: F) -> ClResult<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

		let base_points = get("RATE_LIMITER_BASE_POINTS")
			.ok_or_else(|| Error::ConfigError("RATE_LIMITER_BASE_POINTS is required".into()))?;
		let base_points = NonZeroU32::new(parse_num::<u32>("RATE_LIMITER_BASE_POINTS", &base_points)?)
			.ok_or_else(|| Error::ConfigError("RATE_LIMITER_BASE_POINTS must be > 0".into()))?;

		let base_duration = get("RATE_LIMITER_BASE_DURATION")
			.ok_or_else(|| Error::ConfigError("RATE_LIMITER_BASE_DURATION is required".into()))?;
		let base_duration =
			Duration::from_secs(parse_num::<u64>("RATE_LIMITER_BASE_DURATION", &base_duration)?);

		let mut config = Self::new(base_points, base_duration);

		if let Some(v) = get("BLACKLIST_SYNC_INTERVAL_MS") {
			config.blacklist_sync_interval =
				Duration::from_millis(parse_num("BLACKLIST_SYNC_INTERVAL_MS", &v)?);
		}
		if let Some(v) = get("IP_WHITELIST") {
			let (patterns, invalid) = AddressPattern::parse_list(&v);
			if !invalid.is_empty() {
				warn!("IP_WHITELIST: skipped {} invalid entries", invalid.len());
			}
			config.ip_whitelist = patterns;
		}
		if let Some(v) = get("SLOWDOWN_THRESHOLD_MS") {
			config.slowdown_threshold = Duration::from_millis(parse_num("SLOWDOWN_THRESHOLD_MS", &v)?);
		}
		if let Some(v) = get("BLACKLIST_FILE") {
			config.blacklist_file = PathBuf::from(v);
		}
		if let Some(v) = get("STATS_RESET_INTERVAL_MS") {
			config.stats_reset_interval =
				Duration::from_millis(parse_num("STATS_RESET_INTERVAL_MS", &v)?);
		}
		if let Some(v) = get("RESOURCE_SAMPLE_INTERVAL_MS") {
			config.resource_sample_interval =
				Duration::from_millis(parse_num("RESOURCE_SAMPLE_INTERVAL_MS", &v)?);
		}
		if let Some(v) = get("RESOURCE_THRESHOLD_PERCENT") {
			config.resource_threshold_percent = parse_num("RESOURCE_THRESHOLD_PERCENT", &v)?;
		}
		if let Some(v) = get("LOAD_SHED_THRESHOLD_PERCENT") {
			config.load_shed_threshold_percent = Some(parse_num("LOAD_SHED_THRESHOLD_PERCENT", &v)?);
		}
		if let Some(v) = get("TEMPORARY_BAN_TTL") {
			config.temporary_ban_ttl = Duration::from_secs(parse_num("TEMPORARY_BAN_TTL", &v)?);
		}
		if let Some(v) = get("BACKOFF_RESET_AFTER") {
			let secs: u64 = parse_num("BACKOFF_RESET_AFTER", &v)?;
			config.backoff_reset_after = (secs > 0).then(|| Duration::from_secs(secs));
		}
		if let Some(v) = get("STORE_TIMEOUT_MS") {
			config.store_timeout = Duration::from_millis(parse_num("STORE_TIMEOUT_MS", &v)?);
		}
		if let Some(v) = get("DURABLE_TIMEOUT_MS") {
			config.durable_timeout = Duration::from_millis(parse_num("DURABLE_TIMEOUT_MS", &v)?);
		}
		if let Some(v) = get("LOCAL_CACHE_CAPACITY") {
			config.local_cache_capacity =
				NonZeroUsize::new(parse_num("LOCAL_CACHE_CAPACITY", &v)?).ok_or_else(|| {
					Error::ConfigError("LOCAL_CACHE_CAPACITY must be > 0".into())
				})?;
		}
		if let Some(v) = get("LOCAL_CACHE_TTL") {
			config.local_cache_ttl = Duration::from_secs(parse_num("LOCAL_CACHE_TTL", &v)?);
		}

		config.validate()?;
		Ok(config)
	}

	/// Check invariants that the type system does not cover
	pub fn validate(&self) -> ClResult<()> {
		if self.rate_limiter_base_duration.is_zero() {
			return Err(Error::ConfigError("RATE_LIMITER_BASE_DURATION must be > 0".into()));
		}
		for (name, interval) in [
			("BLACKLIST_SYNC_INTERVAL_MS", self.blacklist_sync_interval),
			("STATS_RESET_INTERVAL_MS", self.stats_reset_interval),
			("RESOURCE_SAMPLE_INTERVAL_MS", self.resource_sample_interval),
			("STORE_TIMEOUT_MS", self.store_timeout),
			("DURABLE_TIMEOUT_MS", self.durable_timeout),
		] {
			if interval.is_zero() {
				return Err(Error::ConfigError(format!("{} must be > 0", name)));
			}
		}
		let percent_ok = |p: f64| p.is_finite() && (0.0..=100.0).contains(&p);
		if !percent_ok(self.resource_threshold_percent) {
			return Err(Error::ConfigError("RESOURCE_THRESHOLD_PERCENT must be 0-100".into()));
		}
		if self.load_shed_threshold_percent.is_some_and(|p| !percent_ok(p)) {
			return Err(Error::ConfigError("LOAD_SHED_THRESHOLD_PERCENT must be 0-100".into()));
		}
		Ok(())
	}
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> ClResult<T> {
	value
		.parse()
		.map_err(|_| Error::ConfigError(format!("{}: invalid number {:?}", name, value)))
}


// vim: ts=4
