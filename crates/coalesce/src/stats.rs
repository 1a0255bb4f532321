use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one live entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightRecord<K> {
	pub key: K,
	pub generation: u64,
	/// Waiters not yet delivered to.
	pub waiters: usize,
	pub delivering: bool,
}

/// Point-in-time copy of the coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlightStats {
	/// Requests that created an entry and received the resolver.
	pub owners: u64,
	/// Requests that attached to an existing entry.
	pub joined: u64,
	/// Outcomes handed to waiters, panicking waiters included.
	pub deliveries: u64,
	/// Waiters that panicked during delivery.
	pub failures: u64,
	/// Entries dropped because every resolver went away unfired.
	pub abandoned: u64,
}

impl FlightStats {
	/// Fraction of requests that were deduplicated.
	pub fn dedup_ratio(&self) -> f64 {
		let total = self.owners + self.joined;
		if total == 0 { 0.0 } else { self.joined as f64 / total as f64 }
	}
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
	owners: AtomicU64,
	joined: AtomicU64,
	deliveries: AtomicU64,
	failures: AtomicU64,
	abandoned: AtomicU64,
}

impl Counters {
	pub fn record_owner(&self) {
		self.owners.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_joined(&self) {
		self.joined.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_delivery(&self) {
		self.deliveries.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_abandoned(&self) {
		self.abandoned.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> FlightStats {
		FlightStats {
			owners: self.owners.load(Ordering::Relaxed),
			joined: self.joined.load(Ordering::Relaxed),
			deliveries: self.deliveries.load(Ordering::Relaxed),
			failures: self.failures.load(Ordering::Relaxed),
			abandoned: self.abandoned.load(Ordering::Relaxed),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dedup_ratio_handles_empty_and_mixed() {
		assert_eq!(FlightStats::default().dedup_ratio(), 0.0);

		let counters = Counters::default();
		counters.record_owner();
		for _ in 0..3 {
			counters.record_joined();
		}
		let stats = counters.snapshot();
		assert_eq!(stats.owners, 1);
		assert_eq!(stats.joined, 3);
		assert!((stats.dedup_ratio() - 0.75).abs() < f64::EPSILON);
	}
}
