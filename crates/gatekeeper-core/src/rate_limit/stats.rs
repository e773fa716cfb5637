//! In-process remaining-points snapshot per IP.
//!
//! Observability only: never persisted, never consulted for decisions, and
//! cleared on a fixed interval.

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct GlobalRateStats {
	remaining: DashMap<Box<str>, u32>,
}

impl GlobalRateStats {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn update(&self, ip: &str, remaining_points: u32) {
		self.remaining.insert(ip.into(), remaining_points);
	}

	pub fn get(&self, ip: &str) -> Option<u32> {
		self.remaining.get(ip).map(|r| *r)
	}

	/// Copy of all entries, sorted by IP
	pub fn snapshot(&self) -> Vec<(Box<str>, u32)> {
		let mut entries: Vec<_> =
			self.remaining.iter().map(|r| (r.key().clone(), *r.value())).collect();
		entries.sort();
		entries
	}

	pub fn remove(&self, ip: &str) {
		self.remaining.remove(ip);
	}

	pub fn len(&self) -> usize {
		self.remaining.len()
	}

	pub fn is_empty(&self) -> bool {
		self.remaining.is_empty()
	}

	pub fn clear(&self) {
		self.remaining.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_update_and_clear() {
		let stats = GlobalRateStats::new();
		stats.update("10.0.0.2", 4);
		stats.update("10.0.0.1", 3);
		stats.update("10.0.0.2", 2);

		assert_eq!(stats.get("10.0.0.2"), Some(2));
		assert_eq!(stats.snapshot(), vec![("10.0.0.1".into(), 3), ("10.0.0.2".into(), 2)]);

		stats.clear();
		assert!(stats.is_empty());
		assert_eq!(stats.get("10.0.0.1"), None);
	}
}

// vim: ts=4
