use std::collections::{HashMap, VecDeque};

use crate::key::FlightKey;

/// Completion callback registered for a key.
pub(crate) type Waiter<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Delivery state of one entry.
///
/// The settled outcome is owned by the drain, never by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
	Pending,
	Delivering,
}

/// Per-key bookkeeping for one in-flight operation.
pub(crate) struct Entry<T> {
	pub generation: u64,
	pub waiters: VecDeque<Waiter<T>>,
	/// Late joins the drain hands to the scheduler instead of invoking.
	pub deferred: VecDeque<Waiter<T>>,
	pub phase: Phase,
}

impl<T> Entry<T> {
	pub fn new(generation: u64, first: Waiter<T>) -> Self {
		let mut waiters = VecDeque::with_capacity(1);
		waiters.push_back(first);
		Self {
			generation,
			waiters,
			deferred: VecDeque::new(),
			phase: Phase::Pending,
		}
	}

	pub fn is_delivering(&self) -> bool {
		self.phase == Phase::Delivering
	}
}

/// Key to entry mapping guarded by the coordinator lock.
pub(crate) struct EntryTable<K, T> {
	entries: HashMap<K, Entry<T>>,
}

impl<K: FlightKey, T> EntryTable<K, T> {
	pub fn new() -> Self {
		Self { entries: HashMap::new() }
	}

	pub fn get(&self, key: &K) -> Option<&Entry<T>> {
		self.entries.get(key)
	}

	pub fn get_mut(&mut self, key: &K) -> Option<&mut Entry<T>> {
		self.entries.get_mut(key)
	}

	/// Returns the entry for `key` only if it still belongs to `generation`.
	pub fn current_mut(&mut self, key: &K, generation: u64) -> Option<&mut Entry<T>> {
		self.entries.get_mut(key).filter(|entry| entry.generation == generation)
	}

	pub fn insert(&mut self, key: K, entry: Entry<T>) {
		let previous = self.entries.insert(key, entry);
		debug_assert!(previous.is_none(), "at most one entry per key");
	}

	/// Removes the entry for `key` if it still belongs to `generation`.
	pub fn remove_current(&mut self, key: &K, generation: u64) -> Option<Entry<T>> {
		match self.entries.get(key) {
			Some(entry) if entry.generation == generation => self.entries.remove(key),
			_ => None,
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&K, &Entry<T>)> {
		self.entries.iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn noop() -> Waiter<u32> {
		Box::new(|_| {})
	}

	#[test]
	fn new_entry_is_pending_with_one_waiter() {
		let entry = Entry::new(3, noop());
		assert_eq!(entry.generation, 3);
		assert_eq!(entry.waiters.len(), 1);
		assert!(!entry.is_delivering());
	}

	#[test]
	fn stale_generation_is_invisible() {
		let mut table: EntryTable<&'static str, u32> = EntryTable::new();
		table.insert("k", Entry::new(2, noop()));

		assert!(table.current_mut(&"k", 1).is_none());
		assert!(table.remove_current(&"k", 1).is_none());
		assert_eq!(table.len(), 1);

		assert!(table.current_mut(&"k", 2).is_some());
		assert!(table.remove_current(&"k", 2).is_some());
		assert_eq!(table.len(), 0);
	}
}
