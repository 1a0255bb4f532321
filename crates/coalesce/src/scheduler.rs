//! Deferred execution used for failure isolation and late-join delivery.
//!
//! A deferred task must never run synchronously inside [`Scheduler::defer`];
//! the drain loop relies on that to keep its own control flow independent of
//! whatever the task does.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Unit of work handed to a [`Scheduler`].
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks soon, but never inline.
pub trait Scheduler: Send + Sync + 'static {
	/// Queues `task` for later execution.
	fn defer(&self, task: DeferredTask);
}

/// Spawns onto the current tokio runtime, or a helper thread outside one.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeScheduler;

impl Scheduler for RuntimeScheduler {
	fn defer(&self, task: DeferredTask) {
		if let Ok(handle) = tokio::runtime::Handle::try_current() {
			tracing::trace!(via = "tokio", "flight.defer");
			drop(handle.spawn(async move { task() }));
			return;
		}
		ThreadScheduler.defer(task);
	}
}

/// Runs every task on its own short-lived named OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
	fn defer(&self, task: DeferredTask) {
		tracing::trace!(via = "thread", "flight.defer");
		if let Err(err) = std::thread::Builder::new().name("keyflight-defer".to_string()).spawn(task) {
			tracing::error!(error = %err, "flight.defer.spawn_failed");
		}
	}
}

/// Host-drained FIFO of deferred tasks.
///
/// Nothing runs until [`run_pending`](Self::run_pending) is called, which
/// makes this the microtask queue for cooperative embeddings and the
/// deterministic scheduler for tests.
#[derive(Default, Clone)]
pub struct LocalQueue {
	tasks: Arc<Mutex<VecDeque<DeferredTask>>>,
}

impl std::fmt::Debug for LocalQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalQueue").field("pending", &self.len()).finish()
	}
}

impl LocalQueue {
	/// Creates an empty queue.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the number of queued tasks.
	pub fn len(&self) -> usize {
		self.tasks.lock().len()
	}

	/// Returns `true` when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.tasks.lock().is_empty()
	}

	/// Runs queued tasks in FIFO order until the queue is empty.
	///
	/// Tasks queued by running tasks are run in the same call. Returns the
	/// number of tasks executed.
	pub fn run_pending(&self) -> usize {
		let mut ran = 0usize;
		loop {
			let Some(task) = self.tasks.lock().pop_front() else {
				return ran;
			};
			task();
			ran = ran.wrapping_add(1);
		}
	}
}

impl Scheduler for LocalQueue {
	fn defer(&self, task: DeferredTask) {
		self.tasks.lock().push_back(task);
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;

	#[test]
	fn local_queue_runs_nothing_until_drained() {
		let queue = LocalQueue::new();
		let hits = Arc::new(AtomicUsize::new(0));
		for _ in 0..3 {
			let hits = Arc::clone(&hits);
			queue.defer(Box::new(move || {
				hits.fetch_add(1, Ordering::SeqCst);
			}));
		}
		assert_eq!(hits.load(Ordering::SeqCst), 0);
		assert_eq!(queue.len(), 3);

		assert_eq!(queue.run_pending(), 3);
		assert_eq!(hits.load(Ordering::SeqCst), 3);
		assert!(queue.is_empty());
	}

	#[test]
	fn local_queue_runs_tasks_queued_while_draining() {
		let queue = LocalQueue::new();
		let order = Arc::new(Mutex::new(Vec::new()));

		let inner_queue = queue.clone();
		let inner_order = Arc::clone(&order);
		queue.defer(Box::new(move || {
			inner_order.lock().push("outer");
			let nested = Arc::clone(&inner_order);
			inner_queue.defer(Box::new(move || nested.lock().push("nested")));
		}));
		let tail = Arc::clone(&order);
		queue.defer(Box::new(move || tail.lock().push("tail")));

		assert_eq!(queue.run_pending(), 3);
		assert_eq!(*order.lock(), vec!["outer", "tail", "nested"]);
	}

	#[test]
	fn runtime_scheduler_falls_back_to_thread_outside_tokio() {
		let (tx, rx) = std::sync::mpsc::channel();
		RuntimeScheduler.defer(Box::new(move || {
			let _ = tx.send(std::thread::current().name().map(str::to_string));
		}));
		let name = rx.recv_timeout(Duration::from_secs(1)).expect("deferred task should run");
		assert_eq!(name.as_deref(), Some("keyflight-defer"));
	}

	#[tokio::test]
	async fn runtime_scheduler_spawns_on_current_runtime() {
		let (tx, rx) = tokio::sync::oneshot::channel();
		RuntimeScheduler.defer(Box::new(move || {
			let _ = tx.send(tokio::runtime::Handle::try_current().is_ok());
		}));
		let on_runtime = tokio::time::timeout(Duration::from_secs(1), rx)
			.await
			.expect("deferred task should run")
			.unwrap();
		assert!(on_runtime);
	}
}
