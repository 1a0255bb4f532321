//! Keyed single-flight coordination.
//!
//! A [`Coordinator`] deduplicates concurrent operations that share a key:
//! at most one operation runs per key, and every caller that asked for the
//! key while it was outstanding receives the same outcome exactly once.
//!
//! * [`Coordinator::request`]: callback-style registration returning a [`Ticket`]
//! * [`Resolver`]: once-only completion handle owned by the first caller
//! * [`Coordinator::run`]: async wrapper around `request` + `resolve`
//! * [`Scheduler`]: deferred execution for waiter failures and late joins
//!
//! ```
//! use keyflight_coalesce::{Coordinator, Ticket};
//!
//! let flights: Coordinator<String, u32> = Coordinator::new();
//! let owner = flights.request("user:42".to_string(), |n| assert_eq!(n, 42)).unwrap();
//! let joined = flights.request("user:42".to_string(), |n| assert_eq!(n, 42)).unwrap();
//! assert!(matches!(joined, Ticket::Joined));
//!
//! if let Ticket::Owner(resolver) = owner {
//! 	resolver.resolve(42);
//! }
//! assert!(flights.is_empty());
//! ```

pub mod config;
pub mod coordinator;
mod entry;
pub mod error;
pub mod failure;
mod generation;
pub mod key;
pub mod resolver;
pub mod scheduler;
pub mod stats;

pub use config::{CoordinatorConfig, FailurePolicy, LateJoin};
pub use coordinator::{Coordinator, Ticket};
pub use error::{FlightError, Result};
pub use failure::WaiterFailure;
pub use key::FlightKey;
pub use resolver::Resolver;
pub use scheduler::{DeferredTask, LocalQueue, RuntimeScheduler, Scheduler, ThreadScheduler};
pub use stats::{FlightRecord, FlightStats};
