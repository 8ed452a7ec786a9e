//! Database-backed queue for parsing jobs.

pub mod queue;

pub use queue::JobQueue;
