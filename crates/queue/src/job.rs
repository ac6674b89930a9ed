//! The job envelope and the queue contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::QueueError;

/// Tuning knobs shared by every queue backend.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Deliveries allowed before a failing job is dead-lettered.
    pub max_attempts: u32,
    /// How long a claimed job stays invisible to other workers. A job not
    /// acknowledged within this window is handed out again.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

/// A unit of work claimed from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Execution the job belongs to. Used for logging and inspection only;
    /// the queue never orders by it.
    pub execution_id: Uuid,
    /// Opaque JSON handed back to the worker.
    pub payload: serde_json::Value,
    /// Deliveries so far, including the current one.
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// What happened to a job handed back with [`JobQueue::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job will be delivered again.
    Requeued,
    /// `max_attempts` reached; the job will not be delivered again.
    DeadLettered,
}

/// The host task queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedule a new job and return its id.
    async fn enqueue(&self, execution_id: Uuid, payload: serde_json::Value) -> Result<Uuid, QueueError>;

    /// Claim the next pending job, if any. Jobs whose claim outlived the
    /// visibility timeout count as pending again.
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Acknowledge a claimed job.
    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Hand a claimed job back after a transient failure.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome, QueueError>;

    /// Park a claimed job that can never succeed (e.g. undecodable payload).
    async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError>;
}
