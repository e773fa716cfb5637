//! Admission decisions and their HTTP translation

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Why a request was let through with a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
	/// Balance is at or below the warning threshold
	NearlyExhausted { remaining: u32 },
	/// Balance was exhausted and reset under a longer window
	BackoffApplied { multiplier: u32, window: Duration },
}

impl Warning {
	/// Value for the `X-RateLimit-Warning` response header
	pub fn header_value(&self) -> String {
		match self {
			Warning::NearlyExhausted { remaining } => {
				format!("nearly-exhausted; remaining={}", remaining)
			}
			Warning::BackoffApplied { multiplier, window } => {
				format!("backoff; multiplier={}; window={}", multiplier, window.as_secs())
			}
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
	/// On the permanent blacklist
	Blacklisted,
	/// Under a temporary ban
	TemporarilyBlacklisted,
	/// Host resources above the load-shed threshold
	Overloaded,
}

impl DenyReason {
	pub fn code(&self) -> &'static str {
		match self {
			DenyReason::Blacklisted => "E-GATE-BLACKLISTED",
			DenyReason::TemporarilyBlacklisted => "E-GATE-TEMPBANNED",
			DenyReason::Overloaded => "E-GATE-OVERLOADED",
		}
	}

	pub fn status(&self) -> StatusCode {
		match self {
			DenyReason::Blacklisted | DenyReason::TemporarilyBlacklisted => StatusCode::FORBIDDEN,
			DenyReason::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
		}
	}

	fn message(&self) -> &'static str {
		match self {
			DenyReason::Blacklisted => "Access denied.",
			DenyReason::TemporarilyBlacklisted => "Access temporarily blocked.",
			DenyReason::Overloaded => "Service is overloaded. Please retry later.",
		}
	}
}

impl fmt::Display for DenyReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.code())
	}
}

impl IntoResponse for DenyReason {
	fn into_response(self) -> Response {
		let body = serde_json::json!({
			"error": {
				"code": self.code(),
				"message": self.message(),
			}
		});
		let mut response = (self.status(), Json(body)).into_response();
		if self == DenyReason::Overloaded {
			if let Ok(val) = "5".parse() {
				response.headers_mut().insert("Retry-After", val);
			}
		}
		response
	}
}

/// Per-request admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	Allow,
	AllowWithWarning(Warning),
	Deny(DenyReason),
	/// Hold the request for this long, then let it through
	Delay(Duration),
}

impl Decision {
	pub fn is_allowed(&self) -> bool {
		!matches!(self, Decision::Deny(_))
	}
}


// vim: ts=4
