//! Error types for the flight coordinator.

use thiserror::Error;

/// Errors surfaced synchronously to coordinator callers.
///
/// Outcome-level failures of the underlying operation are not represented
/// here; they travel to waiters as ordinary outcome values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightError {
	/// The key or callback handed to [`Coordinator::request`] was rejected.
	///
	/// [`Coordinator::request`]: crate::Coordinator::request
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Every resolver for the entry was dropped before an outcome was produced.
	#[error("flight abandoned before an outcome was produced")]
	Abandoned,

	/// Coordinator configuration could not be parsed.
	#[error("invalid coordinator config: {0}")]
	Config(String),
}

impl FlightError {
	pub(crate) fn invalid(reason: impl Into<String>) -> Self {
		Self::InvalidArgument(reason.into())
	}
}

/// Result alias used throughout the crate.
pub type Result<T, E = FlightError> = std::result::Result<T, E>;
