//! Waiter panic isolation and reporting.

use std::any::Any;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::FailurePolicy;
use crate::scheduler::Scheduler;

/// A waiter callback that panicked while receiving its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiterFailure {
	/// `Debug` rendering of the key being delivered.
	pub key: String,
	/// Panic message, when the payload carried one.
	pub message: String,
}

impl std::fmt::Display for WaiterFailure {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "waiter for {} panicked: {}", self.key, self.message)
	}
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return (*msg).to_string();
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return msg.clone();
	}
	"non-string panic payload".to_string()
}

/// Runs `f`, converting a panic into a [`WaiterFailure`] for `key`.
pub(crate) fn isolate<K: Debug>(key: &K, f: impl FnOnce()) -> Result<(), WaiterFailure> {
	std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| WaiterFailure {
		key: format!("{key:?}"),
		message: panic_message(payload.as_ref()),
	})
}

/// Routes waiter failures off the drain path.
pub(crate) struct FailureSink {
	policy: FailurePolicy,
	events: broadcast::Sender<WaiterFailure>,
}

impl FailureSink {
	pub fn new(policy: FailurePolicy, capacity: usize) -> Self {
		let (events, _) = broadcast::channel(capacity);
		Self { policy, events }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<WaiterFailure> {
		self.events.subscribe()
	}

	/// Hands `failure` to `scheduler`; nothing is surfaced inline.
	pub fn report(&self, scheduler: &Arc<dyn Scheduler>, failure: WaiterFailure) {
		let policy = self.policy;
		let events = self.events.clone();
		scheduler.defer(Box::new(move || {
			tracing::error!(key = %failure.key, message = %failure.message, "flight.waiter_panic");
			// No subscribers is fine; the log line above is the record.
			let _ = events.send(failure.clone());
			if policy == FailurePolicy::Propagate {
				panic!("{failure}");
			}
		}));
	}
}
