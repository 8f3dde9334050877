//! Error types for the ember runtime.
//!
//! [`Error`] is the crate-wide error. [`AuthError`] and [`FetchError`] are
//! cloneable because a single failed acquisition or fetch is handed to every
//! caller attached to it.

use std::fmt;

use ember_protocol::PayloadError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the ember runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Envelope failed to deliver or could not be decoded.
	#[error("Transport error: {0}")]
	Transport(String),

	/// Inbound payload did not match the schema for its kind.
	#[error(transparent)]
	Validation(#[from] PayloadError),

	/// Token acquisition failed or is not possible in the current session state.
	#[error(transparent)]
	Auth(#[from] AuthError),

	/// Remote data operation failed after its retry budget.
	#[error(transparent)]
	Fetch(#[from] FetchError),

	/// Timeout waiting for an operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Component was disposed while the operation was pending.
	#[error("{0} was disposed")]
	Disposed(&'static str),

	/// Context was requested in standalone mode, where no host supplies one.
	#[error("No host context in standalone mode")]
	Standalone,

	/// Session state machine rejected a transition.
	#[error("Invalid session transition: {from} -> {to}")]
	InvalidTransition { from: &'static str, to: &'static str },

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if this error means the session is terminally failed.
	pub fn is_auth_failure(&self) -> bool {
		matches!(self, Error::Auth(AuthError::Failed(_)))
	}

	/// Returns the fetch failure if this error came from a data operation.
	pub fn fetch_error(&self) -> Option<&FetchError> {
		match self {
			Error::Fetch(err) => Some(err),
			_ => None,
		}
	}
}

/// Why a token could not be produced.
///
/// "Login required" and "login failed" are separate variants so callers can
/// match on them instead of inspecting messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
	/// The coordinator has not been started.
	#[error("Session not started")]
	NotStarted,

	/// No account is signed in and interactive login was not attempted.
	#[error("Login required")]
	LoginRequired,

	/// Acquisition failed; the session is in its terminal failed state.
	#[error("Authentication failed: {0}")]
	Failed(String),

	/// An envelope that could affect the session came from an unverified origin.
	#[error("Rejected unverified session message: {0}")]
	Rejected(String),
}

/// A remote data operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
	/// Display form of the cache key the operation targeted.
	pub key: String,
	pub message: String,
	/// Number of attempts made before giving up.
	pub attempts: u32,
}

impl FetchError {
	pub fn new(key: impl Into<String>, message: impl Into<String>, attempts: u32) -> Self {
		Self {
			key: key.into(),
			message: message.into(),
			attempts,
		}
	}
}

impl fmt::Display for FetchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Fetch failed for {} after {} attempt{}: {}",
			self.key,
			self.attempts,
			if self.attempts == 1 { "" } else { "s" },
			self.message
		)
	}
}

impl std::error::Error for FetchError {}
