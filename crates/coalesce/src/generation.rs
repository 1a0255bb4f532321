use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out entry ids for one coordinator.
///
/// A resolver remembers the id of the entry it was issued for, and the table
/// only answers to a matching id. Once a key is torn down and requested again
/// the new entry carries a larger id, so the old resolver finds nothing.
#[derive(Debug, Default)]
pub(crate) struct GenerationClock {
	issued: AtomicU64,
}

impl GenerationClock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Issues the next id. The first id is 1.
	///
	/// Ids are taken under the table lock, so relaxed ordering is enough.
	pub fn next(&self) -> u64 {
		self.issued.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_start_at_one_and_never_repeat() {
		let clock = GenerationClock::new();
		let ids: Vec<u64> = (0..4).map(|_| clock.next()).collect();
		assert_eq!(ids, vec![1, 2, 3, 4]);
	}
}
