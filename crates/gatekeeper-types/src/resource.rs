//! Resource sampling collaborator

use std::fmt::Debug;

use crate::prelude::*;

/// Utilization snapshot, both values in percent (0.0 - 100.0)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
	pub cpu_percent: f64,
	pub memory_percent: f64,
}

impl ResourceUsage {
	pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
		Self { cpu_percent, memory_percent }
	}

	/// True if either CPU or memory is strictly above the threshold
	pub fn exceeds(&self, threshold_percent: f64) -> bool {
		self.cpu_percent > threshold_percent || self.memory_percent > threshold_percent
	}
}

/// Supplies current CPU and memory utilization on demand
pub trait ResourceSampler: Debug + Send + Sync {
	fn sample(&self) -> ClResult<ResourceUsage>;
}


// vim: ts=4
