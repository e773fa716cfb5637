//! Resource sampler reading Linux `/proc`

use std::path::PathBuf;

use parking_lot::Mutex;

use gatekeeper_types::prelude::*;
use gatekeeper_types::resource::{ResourceSampler, ResourceUsage};

/// Cumulative CPU jiffies from the aggregate `cpu` line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
	total: u64,
	idle: u64,
}

fn parse_cpu_times(stat: &str) -> ClResult<CpuTimes> {
	let line = stat
		.lines()
		.find(|line| line.starts_with("cpu "))
		.ok_or_else(|| Error::Malformed("no cpu line in /proc/stat".into()))?;
	let fields = line
		.split_whitespace()
		.skip(1)
		.map(str::parse::<u64>)
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| Error::Malformed(format!("/proc/stat: {}", e)))?;
	if fields.len() < 4 {
		return Err(Error::Malformed("short cpu line in /proc/stat".into()));
	}
	// idle + iowait
	let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
	Ok(CpuTimes { total: fields.iter().sum(), idle })
}

fn parse_memory_percent(meminfo: &str) -> ClResult<f64> {
	let field = |name: &str| -> Option<u64> {
		meminfo
			.lines()
			.find_map(|line| line.strip_prefix(name))
			.and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
			.and_then(|value| value.parse().ok())
	};
	let total =
		field("MemTotal").ok_or_else(|| Error::Malformed("no MemTotal in /proc/meminfo".into()))?;
	let available = field("MemAvailable")
		.ok_or_else(|| Error::Malformed("no MemAvailable in /proc/meminfo".into()))?;
	if total == 0 {
		return Err(Error::Malformed("MemTotal is zero".into()));
	}
	Ok(total.saturating_sub(available) as f64 * 100.0 / total as f64)
}

/// CPU busy percentage between two readings
fn cpu_percent(prev: CpuTimes, cur: CpuTimes) -> f64 {
	let total = cur.total.saturating_sub(prev.total);
	if total == 0 {
		return 0.0;
	}
	let idle = cur.idle.saturating_sub(prev.idle);
	total.saturating_sub(idle) as f64 * 100.0 / total as f64
}

/// Samples CPU usage since the previous sample and current memory usage.
/// The first CPU reading is measured since boot.
#[derive(Debug)]
pub struct ProcSampler {
	proc_dir: PathBuf,
	prev_cpu: Mutex<Option<CpuTimes>>,
}

impl ProcSampler {
	pub fn new() -> Self {
		Self::with_proc_dir("/proc")
	}

	pub fn with_proc_dir(proc_dir: impl Into<PathBuf>) -> Self {
		Self { proc_dir: proc_dir.into(), prev_cpu: Mutex::new(None) }
	}
}

impl Default for ProcSampler {
	fn default() -> Self {
		Self::new()
	}
}

impl ResourceSampler for ProcSampler {
	fn sample(&self) -> ClResult<ResourceUsage> {
		let cur = parse_cpu_times(&std::fs::read_to_string(self.proc_dir.join("stat"))?)?;
		let memory =
			parse_memory_percent(&std::fs::read_to_string(self.proc_dir.join("meminfo"))?)?;

		let prev = self.prev_cpu.lock().replace(cur).unwrap_or(CpuTimes { total: 0, idle: 0 });
		Ok(ResourceUsage::new(cpu_percent(prev, cur), memory))
	}
}


// vim: ts=4
