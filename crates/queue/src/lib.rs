//! `queue` crate — the task queue the engine schedules node steps on.
//!
//! Delivery is at-least-once with no ordering guarantee across executions.
//! A job that fails with an infrastructure error is returned to the queue
//! until it has been attempted `max_attempts` times, then dead-lettered.
//! A claimed job that is never acknowledged (the worker died) becomes
//! visible again once its lease expires.

pub mod error;
pub mod job;
pub mod memory;
pub mod postgres;

pub use error::QueueError;
pub use job::{FailOutcome, Job, JobQueue, QueueConfig};
pub use memory::InMemoryJobQueue;
pub use postgres::PgJobQueue;
