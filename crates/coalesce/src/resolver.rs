//! Once-only completion handles and the delivery drain.

use std::fmt;
use std::sync::Arc;

use crate::coordinator::Shared;
use crate::entry::{Entry, Phase, Waiter};
use crate::failure;
use crate::key::FlightKey;

/// Completion handle for one entry.
///
/// Clones share the same once-guard: the first [`resolve`](Self::resolve)
/// from any clone or thread delivers, every later call is silently ignored.
/// The guard check and the switch to delivering happen in one critical
/// section of the coordinator lock.
///
/// Dropping every clone without resolving abandons the entry: its waiters
/// are dropped undelivered and the key becomes free again.
pub struct Resolver<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	core: Arc<ResolverCore<K, T>>,
}

struct ResolverCore<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	shared: Arc<Shared<K, T>>,
	key: K,
	generation: u64,
}

impl<K, T> Clone for Resolver<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	fn clone(&self) -> Self {
		Self {
			core: Arc::clone(&self.core),
		}
	}
}

impl<K, T> fmt::Debug for Resolver<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Resolver")
			.field("key", &self.core.key)
			.field("generation", &self.core.generation)
			.finish()
	}
}

impl<K, T> Resolver<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	pub(crate) fn new(shared: Arc<Shared<K, T>>, key: K, generation: u64) -> Self {
		Self {
			core: Arc::new(ResolverCore { shared, key, generation }),
		}
	}

	/// Returns the key this resolver completes.
	pub fn key(&self) -> &K {
		&self.core.key
	}

	/// Returns `true` once any clone has resolved.
	pub fn is_fired(&self) -> bool {
		let core = &self.core;
		let table = core.shared.table.lock();
		match table.get(&core.key) {
			Some(entry) if entry.generation == core.generation => entry.is_delivering(),
			// While a clone is alive the entry can only be gone after delivery.
			_ => true,
		}
	}

	/// Delivers `outcome` to every waiter of this entry, then removes it.
	///
	/// Waiters run on the calling thread, outside the coordinator lock, in
	/// registration order. Waiters registered while the drain runs are
	/// delivered in the same pass. A panicking waiter is reported through the
	/// scheduler and the drain moves on.
	pub fn resolve(&self, outcome: T) {
		let core = &self.core;
		{
			let mut table = core.shared.table.lock();
			let Some(entry) = table.current_mut(&core.key, core.generation) else {
				tracing::trace!(key = ?core.key, generation = core.generation, "flight.resolve.ignored");
				return;
			};
			if entry.is_delivering() {
				tracing::trace!(key = ?core.key, generation = core.generation, "flight.resolve.ignored");
				return;
			}
			entry.phase = Phase::Delivering;
		}

		tracing::debug!(key = ?core.key, generation = core.generation, "flight.resolve");
		core.shared.drain(&core.key, core.generation, outcome);
	}
}

impl<K, T> Drop for ResolverCore<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	fn drop(&mut self) {
		let abandoned = {
			let mut table = self.shared.table.lock();
			let armed = table
				.get(&self.key)
				.is_some_and(|entry| entry.generation == self.generation && !entry.is_delivering());
			if armed { table.remove_current(&self.key, self.generation) } else { None }
		};

		// Waiters are dropped outside the lock; their captures may call back in.
		if let Some(entry) = abandoned {
			self.shared.counters.record_abandoned();
			tracing::warn!(
				key = ?self.key,
				generation = self.generation,
				waiters = entry.waiters.len(),
				"flight.abandoned"
			);
			drop(entry);
		}
	}
}

/// One step of the drain, decided under the lock and acted on outside it.
enum Next<T> {
	Invoke(Waiter<T>),
	Defer(Waiter<T>),
	Done(Option<Entry<T>>),
}

impl<K, T> Shared<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	/// Drains the waiters of `generation`, re-checking the queues after every
	/// invocation, and tears the entry down once both are empty.
	///
	/// The lock covers only the pop; `outcome` is cloned after it is released.
	pub(crate) fn drain(self: &Arc<Self>, key: &K, generation: u64, outcome: T) {
		tracing::trace!(key = ?key, generation, "flight.drain");
		let mut delivered = 0usize;
		loop {
			let next = {
				let mut table = self.table.lock();
				let Some(entry) = table.current_mut(key, generation) else {
					debug_assert!(false, "delivering entry vanished mid-drain");
					return;
				};
				if let Some(waiter) = entry.deferred.pop_front() {
					Next::Defer(waiter)
				} else if let Some(waiter) = entry.waiters.pop_front() {
					Next::Invoke(waiter)
				} else {
					Next::Done(table.remove_current(key, generation))
				}
			};

			match next {
				Next::Invoke(waiter) => {
					self.deliver(key, waiter, outcome.clone());
					delivered = delivered.wrapping_add(1);
				}
				Next::Defer(waiter) => self.defer_delivery(key.clone(), waiter, outcome.clone()),
				Next::Done(finished) => {
					drop(finished);
					break;
				}
			}
		}
		tracing::trace!(key = ?key, generation, delivered, "flight.teardown");
	}

	/// Hands `outcome` to `waiter` later, through the scheduler.
	fn defer_delivery(self: &Arc<Self>, key: K, waiter: Waiter<T>, outcome: T) {
		let shared = Arc::clone(self);
		self.scheduler.defer(Box::new(move || shared.deliver(&key, waiter, outcome)));
	}

	/// Invokes one waiter with panic isolation.
	fn deliver(&self, key: &K, waiter: Waiter<T>, outcome: T) {
		self.counters.record_delivery();
		if let Err(failure) = failure::isolate(key, move || waiter(outcome)) {
			self.counters.record_failure();
			tracing::debug!(key = ?key, "flight.deliver.waiter_failed");
			self.failures.report(&self.scheduler, failure);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::Coordinator;
	use crate::config::CoordinatorConfig;
	use crate::scheduler::LocalQueue;

	fn coordinator() -> Coordinator<&'static str, u32> {
		Coordinator::with_scheduler(CoordinatorConfig::default(), LocalQueue::new()).unwrap()
	}

	#[test]
	fn clones_share_one_guard() {
		let flights = coordinator();
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&hits);
		let resolver = flights
			.request("k", move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap()
			.into_resolver()
			.unwrap();
		let twin = resolver.clone();

		assert!(!resolver.is_fired());
		twin.resolve(1);
		resolver.resolve(2);
		twin.resolve(3);

		assert!(resolver.is_fired());
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		assert_eq!(resolver.key(), &"k");
	}

	#[test]
	fn dropping_one_clone_keeps_the_entry_armed() {
		let flights = coordinator();
		let resolver = flights.request("k", |_| {}).unwrap().into_resolver().unwrap();
		drop(resolver.clone());

		assert!(flights.contains(&"k"));
		assert_eq!(flights.stats().abandoned, 0);
		resolver.resolve(0);
		assert!(flights.is_empty());
	}

	#[test]
	fn dropping_every_clone_abandons_the_entry() {
		let flights = coordinator();
		let dropped = Arc::new(AtomicUsize::new(0));

		struct DropCounter(Arc<AtomicUsize>);
		impl Drop for DropCounter {
			fn drop(&mut self) {
				self.0.fetch_add(1, Ordering::SeqCst);
			}
		}

		let counter = DropCounter(Arc::clone(&dropped));
		let resolver = flights
			.request("k", move |_| {
				let _counter = &counter;
				panic!("abandoned waiters are never invoked");
			})
			.unwrap()
			.into_resolver()
			.unwrap();
		let counter = DropCounter(Arc::clone(&dropped));
		assert!(
			!flights
				.request("k", move |_| {
					let _counter = &counter;
				})
				.unwrap()
				.is_owner()
		);

		drop(resolver);
		assert_eq!(dropped.load(Ordering::SeqCst), 2);
		assert!(flights.is_empty());
		assert_eq!(flights.stats().abandoned, 1);
		assert!(flights.request("k", |_| {}).unwrap().is_owner());
	}

	/// Collects the message of every event emitted while installed.
	#[derive(Clone, Default)]
	struct EventNames(Arc<parking_lot::Mutex<Vec<String>>>);

	impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventNames {
		fn on_event(&self, event: &tracing::Event<'_>, _: tracing_subscriber::layer::Context<'_, S>) {
			struct Message(Option<String>);
			impl tracing::field::Visit for Message {
				fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
					if field.name() == "message" {
						self.0 = Some(format!("{value:?}"));
					}
				}
			}
			let mut message = Message(None);
			event.record(&mut message);
			if let Some(name) = message.0 {
				self.0.lock().push(name);
			}
		}
	}

	#[test]
	fn delivery_emits_lifecycle_events_in_order() {
		use tracing_subscriber::layer::SubscriberExt;

		let names = EventNames::default();
		let subscriber = tracing_subscriber::registry().with(names.clone());
		tracing::subscriber::with_default(subscriber, || {
			let flights = coordinator();
			let resolver = flights.request("k", |_| {}).unwrap().into_resolver().unwrap();
			let _ = flights.request("k", |_| {}).unwrap();
			resolver.resolve(1);
		});

		let names = names.0.lock();
		let lifecycle: Vec<&str> = names
			.iter()
			.map(String::as_str)
			.filter(|name| matches!(*name, "flight.resolve" | "flight.drain" | "flight.teardown"))
			.collect();
		assert_eq!(lifecycle, vec!["flight.resolve", "flight.drain", "flight.teardown"]);
	}

	#[test]
	fn resolved_then_dropped_is_not_abandonment() {
		let flights = coordinator();
		let resolver = flights.request("k", |_| {}).unwrap().into_resolver().unwrap();
		resolver.resolve(5);
		drop(resolver);
		assert_eq!(flights.stats().abandoned, 0);
	}
}
