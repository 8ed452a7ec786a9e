//! Coordination: admission control, the parsing queue, and the dispatch loop.
//!
//! Exposes the library surface used by both the `storyloom coordinator`
//! binary and tests; the wire listener that speaks the Split Plane Protocol
//! to workers lives in [`server`].

pub mod admission;
pub mod db;
pub mod dispatch;
pub mod ingress;
pub mod retry;
pub mod server;
pub mod store;

pub use admission::{AdmissionConfig, AdmissionControl, ResourceSampler, SysinfoSampler};
pub use db::{queue::QueueStats, JobQueue};
pub use dispatch::Dispatcher;
pub use ingress::{submit_book, SubmitOutcome, DEFAULT_PRIORITY};
pub use server::CoordinationServer;
pub use store::{CoordinationStore, InMemoryStore, StoreError};

#[cfg(feature = "redis-store")]
pub use store::RedisStore;
