//! Keyed single-flight coordinator.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::config::{CoordinatorConfig, LateJoin};
use crate::entry::{Entry, EntryTable, Phase, Waiter};
use crate::error::{FlightError, Result};
use crate::failure::{FailureSink, WaiterFailure};
use crate::generation::GenerationClock;
use crate::key::FlightKey;
use crate::resolver::Resolver;
use crate::scheduler::{RuntimeScheduler, Scheduler};
use crate::stats::{Counters, FlightRecord, FlightStats};

/// State shared by a coordinator, its clones and every resolver it hands out.
pub(crate) struct Shared<K, T> {
	pub(crate) table: Mutex<EntryTable<K, T>>,
	pub(crate) clock: GenerationClock,
	pub(crate) scheduler: Arc<dyn Scheduler>,
	pub(crate) failures: FailureSink,
	pub(crate) counters: Counters,
	pub(crate) config: CoordinatorConfig,
}

/// What [`Coordinator::request`] handed back.
#[must_use = "an owner ticket carries the only resolver for this key"]
pub enum Ticket<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	/// The caller created the entry and must eventually resolve it.
	Owner(Resolver<K, T>),
	/// Another caller owns the key; the callback will still be invoked.
	Joined,
}

impl<K, T> Ticket<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	/// Returns `true` for [`Ticket::Owner`].
	pub fn is_owner(&self) -> bool {
		matches!(self, Self::Owner(_))
	}

	/// Returns the resolver, if this caller owns the key.
	pub fn into_resolver(self) -> Option<Resolver<K, T>> {
		match self {
			Self::Owner(resolver) => Some(resolver),
			Self::Joined => None,
		}
	}
}

impl<K, T> fmt::Debug for Ticket<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Owner(resolver) => f.debug_tuple("Owner").field(resolver).finish(),
			Self::Joined => f.write_str("Joined"),
		}
	}
}

/// Deduplicates concurrent operations that share a key.
///
/// At most one entry exists per key. The first [`request`](Self::request)
/// for an idle key receives the entry's [`Resolver`]; everyone else is
/// attached as a waiter. Resolving delivers one clone of the outcome to each
/// waiter in registration order, then removes the entry so the next request
/// starts a fresh operation. Outcomes are never cached past delivery.
///
/// Clones share the same table.
pub struct Coordinator<K, T> {
	shared: Arc<Shared<K, T>>,
}

impl<K, T> Clone for Coordinator<K, T> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<K, T> Default for Coordinator<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<K, T> fmt::Debug for Coordinator<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Coordinator")
			.field("in_flight", &self.len())
			.field("config", &self.shared.config)
			.finish()
	}
}

impl<K, T> Coordinator<K, T>
where
	K: FlightKey,
	T: Clone + Send + 'static,
{
	/// Creates a coordinator with default config on the [`RuntimeScheduler`].
	pub fn new() -> Self {
		Self::build(CoordinatorConfig::default(), Arc::new(RuntimeScheduler))
	}

	/// Creates a coordinator on the [`RuntimeScheduler`].
	pub fn with_config(config: CoordinatorConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self::build(config, Arc::new(RuntimeScheduler)))
	}

	/// Creates a coordinator that defers through `scheduler`.
	pub fn with_scheduler(config: CoordinatorConfig, scheduler: impl Scheduler) -> Result<Self> {
		config.validate()?;
		Ok(Self::build(config, Arc::new(scheduler)))
	}

	fn build(config: CoordinatorConfig, scheduler: Arc<dyn Scheduler>) -> Self {
		Self {
			shared: Arc::new(Shared {
				table: Mutex::new(EntryTable::new()),
				clock: GenerationClock::new(),
				scheduler,
				failures: FailureSink::new(config.failure_policy, config.failure_buffer),
				counters: Counters::default(),
				config,
			}),
		}
	}

	/// Registers `callback` for the eventual outcome of `key`.
	///
	/// Returns [`Ticket::Owner`] when no entry existed: the caller now owns
	/// the only resolver and should start the underlying operation. Returns
	/// [`Ticket::Joined`] when another caller already owns the key.
	///
	/// While an entry is delivering, late requests join the running drain
	/// under [`LateJoin::Append`]. Under [`LateJoin::Deferred`] the drain
	/// hands them the outcome through the scheduler instead.
	///
	/// # Errors
	///
	/// [`FlightError::InvalidArgument`] when `key` fails validation. No state
	/// is touched in that case.
	pub fn request<F>(&self, key: K, callback: F) -> Result<Ticket<K, T>>
	where
		F: FnOnce(T) + Send + 'static,
	{
		key.validate()?;
		let waiter: Waiter<T> = Box::new(callback);

		let mut table = self.shared.table.lock();
		if let Some(entry) = table.get_mut(&key) {
			let generation = entry.generation;
			match (entry.phase, self.shared.config.late_join) {
				(Phase::Delivering, LateJoin::Deferred) => {
					entry.deferred.push_back(waiter);
					drop(table);
					tracing::trace!(key = ?key, generation, "flight.request.deferred");
					self.shared.counters.record_joined();
				}
				_ => {
					entry.waiters.push_back(waiter);
					let waiters = entry.waiters.len();
					drop(table);
					tracing::trace!(key = ?key, generation, waiters, "flight.request.joined");
					self.shared.counters.record_joined();
				}
			}
			return Ok(Ticket::Joined);
		}

		let generation = self.shared.clock.next();
		table.insert(key.clone(), Entry::new(generation, waiter));
		drop(table);

		tracing::trace!(key = ?key, generation, "flight.request.owner");
		self.shared.counters.record_owner();
		Ok(Ticket::Owner(Resolver::new(Arc::clone(&self.shared), key, generation)))
	}

	/// Runs `op` at most once per key across concurrent callers.
	///
	/// The caller that owns the key awaits `op` and resolves; everyone awaits
	/// the shared outcome. Wrap the call in `tokio::time::timeout` for a
	/// deadline; giving up early leaves the entry alone unless the dropped
	/// caller was the owner.
	///
	/// # Errors
	///
	/// [`FlightError::InvalidArgument`] for a rejected key and
	/// [`FlightError::Abandoned`] when the owner was dropped before resolving.
	pub async fn run<F, Fut>(&self, key: K, op: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let (tx, rx) = oneshot::channel();
		let ticket = self.request(key, move |outcome| {
			// The receiving caller may have timed out.
			let _ = tx.send(outcome);
		})?;

		if let Ticket::Owner(resolver) = ticket {
			let outcome = op().await;
			resolver.resolve(outcome);
		}

		rx.await.map_err(|_| FlightError::Abandoned)
	}

	/// Returns the number of keys with an entry.
	pub fn len(&self) -> usize {
		self.shared.table.lock().len()
	}

	/// Returns `true` if no key has an entry.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns `true` if `key` currently has an entry.
	pub fn contains(&self, key: &K) -> bool {
		self.shared.table.lock().get(key).is_some()
	}

	/// Returns one record per live entry, in no particular order.
	pub fn snapshots(&self) -> Vec<FlightRecord<K>> {
		let table = self.shared.table.lock();
		table
			.iter()
			.map(|(key, entry)| FlightRecord {
				key: key.clone(),
				generation: entry.generation,
				waiters: entry.waiters.len(),
				delivering: entry.is_delivering(),
			})
			.collect()
	}

	/// Returns a copy of the lifetime counters.
	pub fn stats(&self) -> FlightStats {
		self.shared.counters.snapshot()
	}

	/// Subscribes to waiter failures reported after this call.
	pub fn subscribe_failures(&self) -> broadcast::Receiver<WaiterFailure> {
		self.shared.failures.subscribe()
	}

	/// Returns the active configuration.
	pub fn config(&self) -> &CoordinatorConfig {
		&self.shared.config
	}
}
