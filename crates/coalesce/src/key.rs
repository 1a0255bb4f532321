//! Deduplication keys.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{FlightError, Result};

/// Identifying value for one deduplicated operation.
///
/// Keys are compared by value. [`validate`](Self::validate) runs before the
/// coordinator touches any state, so a rejected key never creates an entry.
pub trait FlightKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {
	/// Rejects keys that cannot identify an operation.
	fn validate(&self) -> Result<()> {
		Ok(())
	}
}

fn validate_str(key: &str) -> Result<()> {
	if key.is_empty() {
		return Err(FlightError::invalid("key must be a non-empty string"));
	}
	if key.trim().is_empty() {
		return Err(FlightError::invalid("key must not be whitespace only"));
	}
	Ok(())
}

impl FlightKey for String {
	fn validate(&self) -> Result<()> {
		validate_str(self)
	}
}

impl FlightKey for &'static str {
	fn validate(&self) -> Result<()> {
		validate_str(self)
	}
}

impl FlightKey for Box<str> {
	fn validate(&self) -> Result<()> {
		validate_str(self)
	}
}

impl FlightKey for Arc<str> {
	fn validate(&self) -> Result<()> {
		validate_str(self)
	}
}

macro_rules! integer_keys {
	($($ty:ty),* $(,)?) => {
		$(impl FlightKey for $ty {})*
	};
}

integer_keys!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// A missing key is rejected; a present one validates as itself.
impl<K: FlightKey> FlightKey for Option<K> {
	fn validate(&self) -> Result<()> {
		match self {
			Some(key) => key.validate(),
			None => Err(FlightError::invalid("key is missing")),
		}
	}
}

impl<A: FlightKey, B: FlightKey> FlightKey for (A, B) {
	fn validate(&self) -> Result<()> {
		self.0.validate()?;
		self.1.validate()
	}
}
