//! Per-IP escalating backoff state, kept in the shared tier

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

const NAMESPACE: &str = "gatekeeper";

/// Escalation factor applied to the base window of an IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffRecord {
	pub ip: Box<str>,
	/// Always >= 1
	pub multiplier: u32,
}

pub struct BackoffTracker {
	store: Arc<TieredStore>,
	/// Lifetime of a record after its last escalation; `None` = forever
	reset_after: Option<Duration>,
}

fn backoff_key(ip: &str) -> String {
	format!("backoff_{}", ip)
}

impl BackoffTracker {
	pub fn new(store: Arc<TieredStore>, reset_after: Option<Duration>) -> Self {
		Self { store, reset_after }
	}

	/// Current multiplier for an IP (1 if it never exhausted its quota).
	/// An unreachable shared tier reads as 1.
	pub async fn multiplier(&self, ip: &str) -> u32 {
		match self.store.get_shared::<BackoffRecord>(&backoff_key(ip), NAMESPACE).await {
			Lookup::Found { value, .. } => value.multiplier.max(1),
			Lookup::NotFound => 1,
			Lookup::Unavailable(e) => {
				e.report(&format!("reading backoff of {}", ip));
				1
			}
		}
	}

	/// Raise the multiplier of an IP by one and return the new record.
	///
	/// A failed write is logged; the escalated record is still returned so
	/// the current request uses it.
	pub async fn escalate(&self, ip: &str) -> BackoffRecord {
		let current = self.multiplier(ip).await;
		let record = BackoffRecord { ip: ip.into(), multiplier: current.saturating_add(1) };
		if let Err(e) = self
			.store
			.set_shared(&backoff_key(ip), &record, NAMESPACE, self.reset_after)
			.await
		{
			e.report(&format!("storing backoff of {}", ip));
		}
		record
	}

	pub async fn reset(&self, ip: &str) -> ClResult<()> {
		self.store.del_shared(&backoff_key(ip), NAMESPACE).await
	}
}


// vim: ts=4
