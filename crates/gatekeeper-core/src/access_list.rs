//! Access Lists
//!
//! Static whitelist from configuration, a permanent blacklist kept in all
//! three store tiers, and temporary bans kept only in the shared tier.
//!
//! The permanent blacklist is stored under one key as a JSON array of IP/CIDR
//! strings. The in-memory snapshot answers request-path checks; it is replaced
//! whenever the stored list is read and on every reconciliation tick.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use gatekeeper_types::address::AddressPattern;

use crate::prelude::*;

pub const NAMESPACE: &str = "gatekeeper";
pub const BLACKLIST_KEY: &str = "ipBlacklist";

fn temporary_ban_key(ip: &IpAddr) -> String {
	format!("temporaryBlacklist_{}", ip.to_canonical())
}

/// Outcome of an access list check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	Whitelisted,
	TemporarilyBanned,
	Blacklisted,
	/// On no list
	Unlisted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlacklistStatus {
	pub permanent: bool,
	pub temporary: bool,
}

/// Parse stored entries, skipping (and logging) the ones that are not valid
fn parse_entries(entries: &[String]) -> BTreeSet<AddressPattern> {
	entries
		.iter()
		.filter_map(|entry| match entry.parse::<AddressPattern>() {
			Ok(pattern) => Some(pattern),
			Err(e) => {
				warn!("Skipping invalid blacklist entry {:?}: {}", entry, e);
				None
			}
		})
		.collect()
}

fn to_entries(set: &BTreeSet<AddressPattern>) -> Vec<String> {
	set.iter().map(ToString::to_string).collect()
}

pub struct AccessListManager {
	store: Arc<TieredStore>,
	whitelist: Vec<AddressPattern>,
	blacklist: RwLock<BTreeSet<AddressPattern>>,
	temporary_ban_ttl: Duration,
	/// Serializes read-modify-write of the stored blacklist and file writes
	write_guard: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for AccessListManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AccessListManager")
			.field("whitelist", &self.whitelist)
			.field("blacklist", &self.blacklist.read().len())
			.finish_non_exhaustive()
	}
}

impl AccessListManager {
	pub fn new(
		store: Arc<TieredStore>,
		whitelist: Vec<AddressPattern>,
		temporary_ban_ttl: Duration,
	) -> Self {
		Self {
			store,
			whitelist,
			blacklist: RwLock::new(BTreeSet::new()),
			temporary_ban_ttl,
			write_guard: tokio::sync::Mutex::new(()),
		}
	}

	/// Load the blacklist, falling back shared → durable.
	///
	/// A durable hit is written through to the shared tier by the store.
	/// Unreadable or corrupt data leaves the list empty. Returns the number of
	/// entries loaded.
	pub async fn initialize(&self) -> usize {
		let entries = match self.store.get::<Vec<String>>(BLACKLIST_KEY, NAMESPACE).await {
			Lookup::Found { value, tier } => {
				info!("Blacklist loaded from {} tier ({} entries)", tier.name(), value.len());
				parse_entries(&value)
			}
			Lookup::NotFound => {
				info!("No stored blacklist, starting with an empty one");
				BTreeSet::new()
			}
			Lookup::Unavailable(e) => {
				e.report("loading blacklist");
				BTreeSet::new()
			}
		};
		let count = entries.len();
		*self.blacklist.write() = entries;
		info!("Whitelist holds {} entries", self.whitelist.len());
		count
	}

	pub fn is_whitelisted(&self, ip: &IpAddr) -> bool {
		self.whitelist.iter().any(|pattern| pattern.contains(ip))
	}

	fn in_snapshot(&self, ip: &IpAddr) -> bool {
		self.blacklist.read().iter().any(|pattern| pattern.contains(ip))
	}

	/// Request-path check: whitelist, then temporary ban, then the permanent
	/// blacklist snapshot
	pub async fn check(&self, ip: &IpAddr) -> Verdict {
		if self.is_whitelisted(ip) {
			return Verdict::Whitelisted;
		}
		if self.is_temporarily_blacklisted(ip).await {
			return Verdict::TemporarilyBanned;
		}
		if self.in_snapshot(ip) {
			return Verdict::Blacklisted;
		}
		Verdict::Unlisted
	}

	/// A shared tier failure reads as "not banned"
	pub async fn is_temporarily_blacklisted(&self, ip: &IpAddr) -> bool {
		match self.store.get_shared::<bool>(&temporary_ban_key(ip), NAMESPACE).await {
			Lookup::Found { value, .. } => value,
			Lookup::NotFound => false,
			Lookup::Unavailable(e) => {
				e.report(&format!("temporary ban lookup for {}", ip));
				false
			}
		}
	}

	/// Check the permanent blacklist against the shared tier. The durable
	/// tier is only read when the shared tier is down or holds no list.
	pub async fn is_blacklisted(&self, ip: &IpAddr) -> bool {
		let stored = match self.store.get_shared::<Vec<String>>(BLACKLIST_KEY, NAMESPACE).await {
			Lookup::Found { value, .. } => Some(value),
			Lookup::NotFound => self.load_file().await,
			Lookup::Unavailable(e) => {
				e.report(&format!("blacklist lookup for {}", ip));
				self.load_file().await
			}
		};
		if let Some(entries) = stored {
			self.refresh(parse_entries(&entries));
		}
		self.in_snapshot(ip)
	}

	async fn load_file(&self) -> Option<Vec<String>> {
		match self.store.load_durable::<Vec<String>>(BLACKLIST_KEY, NAMESPACE).await {
			Lookup::Found { value, .. } => Some(value),
			Lookup::NotFound => None,
			Lookup::Unavailable(e) => {
				e.report("blacklist durable fallback");
				None
			}
		}
	}

	/// Replace the snapshot and the local tier copy together
	fn refresh(&self, set: BTreeSet<AddressPattern>) {
		if let Err(e) = self.store.set_local(BLACKLIST_KEY, &to_entries(&set), NAMESPACE, None) {
			e.report("caching blacklist locally");
		}
		*self.blacklist.write() = set;
	}

	pub async fn status(&self, ip: &IpAddr) -> BlacklistStatus {
		BlacklistStatus {
			permanent: self.is_blacklisted(ip).await,
			temporary: self.is_temporarily_blacklisted(ip).await,
		}
	}

	/// Stored list as seen by the shared tier, or the snapshot if the shared
	/// tier holds nothing or cannot be reached
	async fn current(&self) -> BTreeSet<AddressPattern> {
		match self.store.get_shared::<Vec<String>>(BLACKLIST_KEY, NAMESPACE).await {
			Lookup::Found { value, .. } => parse_entries(&value),
			Lookup::NotFound => self.blacklist.read().clone(),
			Lookup::Unavailable(e) => {
				e.report("reading blacklist before update");
				self.blacklist.read().clone()
			}
		}
	}

	/// Write the list to the caches and the durable tier. Failures are logged.
	async fn save(&self, set: &BTreeSet<AddressPattern>) {
		let entries = to_entries(set);
		if let Err(e) = self.store.set(BLACKLIST_KEY, &entries, NAMESPACE, None).await {
			e.report("storing blacklist in shared tier");
		}
		if let Err(e) = self.store.persist(BLACKLIST_KEY, &entries, NAMESPACE).await {
			e.report("persisting blacklist");
		}
	}

	/// Add an IP or CIDR range. Returns false if it was already listed.
	pub async fn add(&self, entry: &str) -> ClResult<bool> {
		let pattern: AddressPattern = entry.parse()?;
		let _guard = self.write_guard.lock().await;

		let mut set = self.current().await;
		let added = set.insert(pattern);
		if added {
			self.save(&set).await;
			info!("Added {} to blacklist", pattern);
		} else {
			debug!("{} already blacklisted", pattern);
		}
		self.refresh(set);
		Ok(added)
	}

	/// Remove an IP or CIDR range. Returns false if it was not listed.
	pub async fn remove(&self, entry: &str) -> ClResult<bool> {
		let pattern: AddressPattern = entry.parse()?;
		let _guard = self.write_guard.lock().await;

		let mut set = self.current().await;
		let removed = set.remove(&pattern);
		if removed {
			self.save(&set).await;
			info!("Removed {} from blacklist", pattern);
		} else {
			debug!("{} not blacklisted", pattern);
		}
		self.refresh(set);
		Ok(removed)
	}

	/// Ban an IP in the shared tier only. `None` uses the configured TTL.
	pub async fn temporary_ban(&self, ip: &IpAddr, ttl: Option<Duration>) -> ClResult<()> {
		let ttl = ttl.unwrap_or(self.temporary_ban_ttl);
		self.store.set_shared(&temporary_ban_key(ip), &true, NAMESPACE, Some(ttl)).await?;
		info!("Temporarily banned {} for {}s", ip, ttl.as_secs());
		Ok(())
	}

	pub async fn lift_temporary_ban(&self, ip: &IpAddr) -> ClResult<()> {
		self.store.del_shared(&temporary_ban_key(ip), NAMESPACE).await?;
		info!("Lifted temporary ban of {}", ip);
		Ok(())
	}

	/// Pull the shared-tier blacklist into the durable tier, the local tier and
	/// the snapshot.
	///
	/// If the shared tier lost the list, the snapshot is written back to it.
	pub async fn sync_from_shared(&self) -> ClResult<()> {
		let _guard = self.write_guard.lock().await;

		match self.store.get_shared::<Vec<String>>(BLACKLIST_KEY, NAMESPACE).await {
			Lookup::Found { value, .. } => {
				let set = parse_entries(&value);
				self.store.persist(BLACKLIST_KEY, &to_entries(&set), NAMESPACE).await?;
				debug!("Blacklist synced to durable tier ({} entries)", set.len());
				self.refresh(set);
				Ok(())
			}
			Lookup::NotFound => {
				let entries = to_entries(&self.blacklist.read());
				if entries.is_empty() {
					return Ok(());
				}
				warn!("Shared tier lost the blacklist, restoring {} entries", entries.len());
				self.store.set_shared(BLACKLIST_KEY, &entries, NAMESPACE, None).await
			}
			Lookup::Unavailable(e) => Err(e),
		}
	}

	/// Snapshot of the permanent blacklist in canonical form
	pub fn list_blacklist(&self) -> Vec<String> {
		to_entries(&self.blacklist.read())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::TieredStoreOpts;
	use crate::test_support::{FakeDurable, FakeShared};
	use std::num::NonZeroUsize;

	const FULL_KEY: &str = "gatekeeper:ipBlacklist";

	fn manager(
		shared: &Arc<FakeShared>,
		durable: &Arc<FakeDurable>,
		whitelist: &str,
	) -> AccessListManager {
		let store = TieredStore::new(
			shared.clone(),
			Some(durable.clone()),
			TieredStoreOpts {
				local_capacity: NonZeroUsize::new(64).unwrap(),
				local_max_ttl: Duration::from_secs(3600),
				shared_timeout: Duration::from_millis(100),
				durable_timeout: Duration::from_secs(1),
			},
		)
		.with_durable_key(BLACKLIST_KEY, NAMESPACE);
		let (whitelist, _) = AddressPattern::parse_list(whitelist);
		AccessListManager::new(Arc::new(store), whitelist, Duration::from_secs(3600))
	}

	fn ip(s: &str) -> IpAddr {
		s.parse().unwrap()
	}

	#[tokio::test]
	async fn test_add_remove_idempotent() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "");
		acl.initialize().await;

		assert!(acl.add("192.0.2.1").await.unwrap());
		assert!(!acl.add("192.0.2.1").await.unwrap());
		assert!(!acl.add("192.0.2.1/32").await.unwrap());
		assert_eq!(acl.list_blacklist(), vec!["192.0.2.1"]);
		assert_eq!(durable.raw(FULL_KEY).as_deref(), Some(r#"["192.0.2.1"]"#));

		assert!(acl.remove("192.0.2.1").await.unwrap());
		assert!(!acl.remove("192.0.2.1").await.unwrap());
		assert!(acl.list_blacklist().is_empty());
		assert_eq!(durable.raw(FULL_KEY).as_deref(), Some("[]"));
	}

	#[tokio::test]
	async fn test_invalid_entry_rejected() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "");
		assert!(matches!(acl.add("not-an-ip").await, Err(Error::Malformed(_))));
	}

	#[tokio::test]
	async fn test_initialize_from_file_heals_shared() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		durable.put(FULL_KEY, r#"["198.51.100.5", "10.1.0.0/16", "garbage"]"#);
		let acl = manager(&shared, &durable, "");

		assert_eq!(acl.initialize().await, 2);
		assert!(shared.raw(FULL_KEY).is_some());
		assert_eq!(acl.check(&ip("10.1.200.3")).await, Verdict::Blacklisted);
		assert_eq!(acl.check(&ip("10.2.0.1")).await, Verdict::Unlisted);
	}

	#[tokio::test]
	async fn test_corrupt_file_is_empty_list() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		durable.put(FULL_KEY, "{not json");
		let acl = manager(&shared, &durable, "");

		assert_eq!(acl.initialize().await, 0);
		assert!(acl.add("192.0.2.9").await.unwrap());
		assert_eq!(durable.raw(FULL_KEY).as_deref(), Some(r#"["192.0.2.9"]"#));
	}

	#[tokio::test]
	async fn test_whitelist_wins() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "10.0.0.0/8");
		acl.add("10.0.0.1").await.unwrap();
		acl.temporary_ban(&ip("10.0.0.1"), None).await.unwrap();

		assert_eq!(acl.check(&ip("10.0.0.1")).await, Verdict::Whitelisted);
	}

	#[tokio::test(start_paused = true)]
	async fn test_temporary_ban_expires() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "");
		let banned = ip("203.0.113.50");

		acl.temporary_ban(&banned, Some(Duration::from_secs(60))).await.unwrap();
		assert_eq!(acl.check(&banned).await, Verdict::TemporarilyBanned);
		assert_eq!(acl.status(&banned).await, BlacklistStatus { permanent: false, temporary: true });
		assert!(durable.raw(FULL_KEY).is_none());

		tokio::time::advance(Duration::from_secs(61)).await;
		assert_eq!(acl.check(&banned).await, Verdict::Unlisted);
	}

	#[tokio::test]
	async fn test_lift_temporary_ban() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "");
		let banned = ip("203.0.113.51");

		acl.temporary_ban(&banned, None).await.unwrap();
		acl.lift_temporary_ban(&banned).await.unwrap();
		assert!(!acl.is_temporarily_blacklisted(&banned).await);
	}

	#[tokio::test]
	async fn test_shared_outage_falls_back_to_file() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		durable.put(FULL_KEY, r#"["198.51.100.5"]"#);
		let acl = manager(&shared, &durable, "");
		shared.set_failing(true);

		assert!(acl.is_blacklisted(&ip("198.51.100.5")).await);
		assert_eq!(
			acl.status(&ip("198.51.100.5")).await,
			BlacklistStatus { permanent: true, temporary: false }
		);
	}

	#[tokio::test]
	async fn test_sync_pulls_shared_into_file() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "");
		acl.initialize().await;

		shared.put(FULL_KEY, r#"["192.0.2.77"]"#);
		acl.sync_from_shared().await.unwrap();
		assert_eq!(durable.raw(FULL_KEY).as_deref(), Some(r#"["192.0.2.77"]"#));
		assert_eq!(acl.list_blacklist(), vec!["192.0.2.77"]);

		shared.clear();
		acl.sync_from_shared().await.unwrap();
		assert_eq!(shared.raw(FULL_KEY).as_deref(), Some(r#"["192.0.2.77"]"#));
	}

	#[tokio::test]
	async fn test_query_does_not_undo_synced_entries() {
		let shared = FakeShared::new();
		shared.put(FULL_KEY, r#"["192.0.2.1"]"#);
		let a = manager(&shared, &FakeDurable::new(), "");
		let b = manager(&shared, &FakeDurable::new(), "");
		a.initialize().await;
		b.initialize().await;

		a.add("192.0.2.2").await.unwrap();
		b.sync_from_shared().await.unwrap();
		assert_eq!(b.check(&ip("192.0.2.2")).await, Verdict::Blacklisted);

		// a read on b must not bring back its older local copy
		assert!(b.is_blacklisted(&ip("192.0.2.2")).await);
		assert_eq!(b.check(&ip("192.0.2.2")).await, Verdict::Blacklisted);
		assert_eq!(b.list_blacklist(), vec!["192.0.2.1", "192.0.2.2"]);

		let local = b.store.get::<Vec<String>>(BLACKLIST_KEY, NAMESPACE).await;
		assert_eq!(local.tier(), Some(crate::store::Tier::Local));
		assert_eq!(local.value(), Some(vec!["192.0.2.1".to_string(), "192.0.2.2".to_string()]));
	}

	#[tokio::test]
	async fn test_query_sees_other_instance_without_sync() {
		let shared = FakeShared::new();
		let a = manager(&shared, &FakeDurable::new(), "");
		let b = manager(&shared, &FakeDurable::new(), "");
		a.initialize().await;
		b.initialize().await;

		a.add("198.51.100.0/24").await.unwrap();
		assert!(b.is_blacklisted(&ip("198.51.100.9")).await);
		a.remove("198.51.100.0/24").await.unwrap();
		assert!(!b.is_blacklisted(&ip("198.51.100.9")).await);
		assert_eq!(b.check(&ip("198.51.100.9")).await, Verdict::Unlisted);
	}

	#[tokio::test]
	async fn test_empty_shared_tier_reads_file() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "");
		acl.initialize().await;

		durable.put(FULL_KEY, r#"["203.0.113.4"]"#);
		assert!(acl.is_blacklisted(&ip("203.0.113.4")).await);
	}

	#[tokio::test]
	async fn test_sync_reports_outage() {
		let shared = FakeShared::new();
		let durable = FakeDurable::new();
		let acl = manager(&shared, &durable, "");
		shared.set_failing(true);
		assert!(acl.sync_from_shared().await.is_err());
	}
}

// vim: ts=4
