//! Error type shared by the core and the storage adapters.
//!
//! Every failure is classified as recoverable or fatal. Recoverable errors come
//! from storage tiers and malformed data: they are logged and a fallback path
//! is taken. Fatal errors come from configuration and internal invariants and
//! stop startup.

use std::fmt;

pub type ClResult<T> = std::result::Result<T, Error>;

/// How a failure affects the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
	/// Logged, fallback path taken, requests still served
	Recoverable,
	/// The service cannot compute a valid admission policy
	Fatal,
}

#[derive(Debug)]
pub enum Error {
	NotFound,
	/// Missing or invalid configuration
	ConfigError(String),
	/// A storage tier refused or failed the call
	StoreUnavailable {
		tier: &'static str,
		reason: String,
	},
	/// A storage tier did not answer in time
	Timeout {
		tier: &'static str,
	},
	/// Stored data could not be decoded
	Malformed(String),
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl Error {
	pub fn unavailable(tier: &'static str, reason: impl fmt::Display) -> Self {
		Error::StoreUnavailable { tier, reason: reason.to_string() }
	}

	pub fn severity(&self) -> Severity {
		match self {
			Error::ConfigError(_) | Error::Internal(_) => Severity::Fatal,
			Error::NotFound
			| Error::StoreUnavailable { .. }
			| Error::Timeout { .. }
			| Error::Malformed(_)
			| Error::Io(_) => Severity::Recoverable,
		}
	}

	pub fn is_recoverable(&self) -> bool {
		self.severity() == Severity::Recoverable
	}

	/// Log the error at a level matching its severity
	pub fn report(&self, context: &str) {
		match self.severity() {
			Severity::Recoverable => {
				tracing::warn!("{}: recoverable error: {}", context, self);
			}
			Severity::Fatal => {
				tracing::error!("{}: FATAL: {}", context, self);
			}
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::ConfigError(msg) => write!(f, "configuration error: {}", msg),
			Error::StoreUnavailable { tier, reason } => {
				write!(f, "{} tier unavailable: {}", tier, reason)
			}
			Error::Timeout { tier } => write!(f, "{} tier timed out", tier),
			Error::Malformed(msg) => write!(f, "malformed data: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(err) => Some(err),
			_ => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Malformed(err.to_string())
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		Self::Internal(err.to_string())
	}
}


// vim: ts=4
