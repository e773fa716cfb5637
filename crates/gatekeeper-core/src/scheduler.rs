//! Scheduler for periodic background tasks.
//!
//! Each task runs on its own tokio task driven by an interval. All of them
//! share one cancellation token so `shutdown` stops them deterministically.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;

#[async_trait]
pub trait PeriodicTask: Send + Sync + Debug {
	fn kind_of(&self) -> &'static str;
	async fn run(&self) -> ClResult<()>;
}

#[derive(Debug, Default)]
pub struct Scheduler {
	cancel: CancellationToken,
	handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Scheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Run a task every `every`, first run after one period.
	/// A failed run is reported and the task keeps its schedule.
	pub fn spawn(&self, task: Arc<dyn PeriodicTask>, every: Duration) {
		let kind = task.kind_of();
		let cancel = self.cancel.clone();

		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					() = cancel.cancelled() => break,
					_ = ticker.tick() => {
						debug!("Running periodic task {}", kind);
						if let Err(e) = task.run().await {
							e.report(&format!("periodic task {}", kind));
						}
					}
				}
			}
			debug!("Periodic task {} stopped", kind);
		});

		info!("Scheduled {} every {}ms", kind, every.as_millis());
		self.handles.lock().push((kind, handle));
	}

	pub fn len(&self) -> usize {
		self.handles.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.handles.lock().is_empty()
	}

	/// Cancel all tasks and wait for them to finish. Safe to call twice.
	pub async fn shutdown(&self) {
		self.cancel.cancel();
		let handles = std::mem::take(&mut *self.handles.lock());
		for (kind, handle) in handles {
			if let Err(e) = handle.await {
				Error::from(e).report(&format!("stopping periodic task {}", kind));
			}
		}
	}
}


// vim: ts=4
