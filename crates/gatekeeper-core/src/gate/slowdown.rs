//! Per-session minimum spacing between requests

use std::time::Duration;

use tokio::time::Instant;

/// Slowdown state of one client session, owned by the caller
#[derive(Debug, Clone, Default)]
pub struct SessionState {
	/// When the last admitted request of the session runs (or ran)
	last_request: Option<Instant>,
}

impl SessionState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn last_request(&self) -> Option<Instant> {
		self.last_request
	}
}

#[derive(Debug, Clone, Copy)]
pub struct SlowdownCheck {
	threshold: Duration,
}

impl SlowdownCheck {
	/// A zero threshold disables the check
	pub fn new(threshold: Duration) -> Self {
		Self { threshold }
	}

	pub fn is_enabled(&self) -> bool {
		!self.threshold.is_zero()
	}

	/// Record a request at `now` and return how long it must wait, if at all.
	///
	/// A delayed request is booked at the end of its wait, so back-to-back
	/// requests queue up one threshold apart.
	pub fn evaluate(&self, session: &mut SessionState, now: Instant) -> Option<Duration> {
		if !self.is_enabled() {
			session.last_request = Some(now);
			return None;
		}

		match session.last_request {
			Some(last) if now < last + self.threshold => {
				let slot = last + self.threshold;
				session.last_request = Some(slot);
				Some(slot - now)
			}
			_ => {
				session.last_request = Some(now);
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_spacing() {
		let check = SlowdownCheck::new(Duration::from_millis(500));
		let mut session = SessionState::new();
		let t0 = Instant::now();

		assert_eq!(check.evaluate(&mut session, t0), None);
		assert_eq!(
			check.evaluate(&mut session, t0 + Duration::from_millis(200)),
			Some(Duration::from_millis(300))
		);
		// booked at t0+500, so the next slot is t0+1000
		assert_eq!(
			check.evaluate(&mut session, t0 + Duration::from_millis(300)),
			Some(Duration::from_millis(700))
		);
		assert_eq!(check.evaluate(&mut session, t0 + Duration::from_millis(1600)), None);
	}

	#[tokio::test]
	async fn test_disabled() {
		let check = SlowdownCheck::new(Duration::ZERO);
		let mut session = SessionState::new();
		let now = Instant::now();
		assert_eq!(check.evaluate(&mut session, now), None);
		assert_eq!(check.evaluate(&mut session, now), None);
		assert_eq!(session.last_request(), Some(now));
	}

	#[tokio::test]
	async fn test_sessions_are_independent() {
		let check = SlowdownCheck::new(Duration::from_secs(1));
		let mut a = SessionState::new();
		let mut b = SessionState::new();
		let now = Instant::now();

		assert_eq!(check.evaluate(&mut a, now), None);
		assert_eq!(check.evaluate(&mut b, now), None);
		assert!(check.evaluate(&mut a, now).is_some());
	}
}

// vim: ts=4
