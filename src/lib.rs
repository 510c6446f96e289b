//! At-least-once message delivery layered on a minimal list/key-value store.
//!
//! Many shared stores offer only list push/pop and key expiry, with no
//! native "pop with a lease". This crate synthesizes one: [queue::Queue]
//! pairs an atomic list pop with a separately-keyed, expiring lease record,
//! and a compensating sweep returns any claim that was never acknowledged
//! (consumer crash, network partition) to the pending list once its lease
//! runs out. [dispatch::Dispatcher] is the polling consumer that drives the
//! claim, callback, acknowledge cycle on top.
//!
//! The store itself stays an external collaborator behind the
//! [store::Store] trait; [store::Memory] is provided for tests and
//! single-process use.
//!
//! # Delivery Guarantees
//!
//! At-least-once, per topic: a payload is redelivered until some consumer
//! acknowledges it, and duplicates are possible whenever a lease expires and
//! is requeued. FIFO order holds per producer until a requeue re-admits a
//! payload as newest-pending. Exactly-once delivery and cross-consumer
//! ordering are out of scope.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use leasemq::{
//!     clock::SystemClock,
//!     queue::{Config, Queue},
//!     store::Memory,
//! };
//! use prometheus_client::registry::Registry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = Registry::default();
//!     let store = Memory::new(SystemClock);
//!     let queue = Queue::new(store, SystemClock, Config::new("tasks"), &mut registry);
//!
//!     queue.enqueue([Bytes::from_static(b"job")]).await;
//!     if let Some(claim) = queue.dequeue().await {
//!         // process, then:
//!         claim.ack().await;
//!     }
//! }
//! ```

pub mod clock;
pub mod dispatch;
pub mod envelope;
pub mod mocks;
pub mod queue;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use dispatch::{Dispatcher, Stopper};
pub use queue::{Claim, Queue};
pub use store::Store;
