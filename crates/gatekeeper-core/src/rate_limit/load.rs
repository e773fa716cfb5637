//! Resource load tracking for budget adaptation and load shedding

use std::sync::Arc;

use parking_lot::RwLock;

use gatekeeper_types::resource::{ResourceSampler, ResourceUsage};

use crate::prelude::*;

/// Holds the most recent resource sample.
///
/// Requests read the cached sample; only the periodic task calls the sampler.
#[derive(Debug)]
pub struct LoadMonitor {
	sampler: Arc<dyn ResourceSampler>,
	last: RwLock<Option<ResourceUsage>>,
	shed_threshold: Option<f64>,
}

impl LoadMonitor {
	pub fn new(sampler: Arc<dyn ResourceSampler>, shed_threshold: Option<f64>) -> Self {
		Self { sampler, last: RwLock::new(None), shed_threshold }
	}

	/// Take a fresh sample and remember it. A failed sample is logged and
	/// the previous one is kept.
	pub fn refresh(&self) -> Option<ResourceUsage> {
		match self.sampler.sample() {
			Ok(usage) => {
				debug!(
					"Resource sample: cpu {:.1}%, memory {:.1}%",
					usage.cpu_percent, usage.memory_percent
				);
				*self.last.write() = Some(usage);
				Some(usage)
			}
			Err(e) => {
				e.report("sampling resources");
				None
			}
		}
	}

	pub fn last(&self) -> Option<ResourceUsage> {
		*self.last.read()
	}

	/// True if load shedding is enabled and the last sample is above its
	/// threshold
	pub fn should_shed(&self) -> bool {
		match (self.shed_threshold, self.last()) {
			(Some(threshold), Some(usage)) => usage.exceeds(threshold),
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::FixedSampler;

	#[test]
	fn test_shedding_follows_last_sample() {
		let sampler = FixedSampler::new(50.0, 40.0);
		let monitor = LoadMonitor::new(sampler.clone(), Some(90.0));
		assert!(!monitor.should_shed());

		monitor.refresh();
		assert!(!monitor.should_shed());

		sampler.set(97.0, 40.0);
		assert!(!monitor.should_shed());
		monitor.refresh();
		assert!(monitor.should_shed());
	}

	#[test]
	fn test_shedding_disabled() {
		let sampler = FixedSampler::new(100.0, 100.0);
		let monitor = LoadMonitor::new(sampler, None);
		monitor.refresh();
		assert!(!monitor.should_shed());
		assert_eq!(monitor.last(), Some(ResourceUsage::new(100.0, 100.0)));
	}
}

// vim: ts=4
