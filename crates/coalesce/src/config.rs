//! Coordinator configuration.

use serde::Deserialize;

use crate::error::{FlightError, Result};

/// Capacity of the waiter-failure broadcast channel unless configured.
pub const DEFAULT_FAILURE_BUFFER: usize = 64;

/// Largest accepted failure broadcast capacity.
pub const MAX_FAILURE_BUFFER: usize = 1 << 16;

/// How a request is handled when its key is already delivering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateJoin {
	/// Join the live waiter queue; the running drain delivers in FIFO order.
	#[default]
	Append,
	/// Receive the cached outcome through the scheduler instead of the queue.
	Deferred,
}

/// What happens to a waiter failure after it has been reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
	/// Log and broadcast the failure.
	#[default]
	Report,
	/// Log, broadcast, then panic inside the deferred task.
	Propagate,
}

/// Tunables for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
	pub late_join: LateJoin,
	pub failure_policy: FailurePolicy,
	/// Capacity of the failure broadcast channel, in `1..=MAX_FAILURE_BUFFER`.
	pub failure_buffer: usize,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			late_join: LateJoin::Append,
			failure_policy: FailurePolicy::Report,
			failure_buffer: DEFAULT_FAILURE_BUFFER,
		}
	}
}

impl CoordinatorConfig {
	/// Parses a TOML document. Missing fields take their defaults.
	pub fn from_toml_str(src: &str) -> Result<Self> {
		let config: Self = toml::from_str(src).map_err(|e| FlightError::Config(e.to_string()))?;
		config.validate()?;
		Ok(config)
	}

	/// Sets the late-join policy.
	pub fn late_join(mut self, late_join: LateJoin) -> Self {
		self.late_join = late_join;
		self
	}

	/// Sets the failure policy.
	pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
		self.failure_policy = policy;
		self
	}

	/// Sets the failure broadcast capacity.
	pub fn failure_buffer(mut self, capacity: usize) -> Self {
		self.failure_buffer = capacity;
		self
	}

	pub(crate) fn validate(&self) -> Result<()> {
		if self.failure_buffer == 0 {
			return Err(FlightError::Config("failure_buffer must be > 0".to_string()));
		}
		if self.failure_buffer > MAX_FAILURE_BUFFER {
			return Err(FlightError::Config(format!("failure_buffer must be <= {MAX_FAILURE_BUFFER}")));
		}
		Ok(())
	}
}
