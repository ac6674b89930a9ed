//! In-process queue for tests, the `run` command and single-node setups.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{FailOutcome, Job, JobQueue, QueueConfig, QueueError};

/// A job parked after it could not be processed.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: Job,
    pub error: String,
}

/// A job handed to a worker and when it was handed out.
struct Claim {
    job: Job,
    claimed_at: Instant,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<Job>,
    in_flight: HashMap<Uuid, Claim>,
    dead_letters: Vec<DeadLetter>,
    completed: usize,
}

impl Inner {
    /// Move claims older than `timeout` back to the pending queue.
    fn reclaim_expired(&mut self, timeout: Duration) {
        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, claim)| claim.claimed_at.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(claim) = self.in_flight.remove(&id) {
                warn!(job_id = %id, attempts = claim.job.attempts, "job lease expired; redelivering");
                self.pending.push_back(claim.job);
            }
        }
    }

    fn release(&mut self, job_id: Uuid) -> Result<Job, QueueError> {
        self.in_flight
            .remove(&job_id)
            .map(|claim| claim.job)
            .ok_or(QueueError::UnknownJob(job_id))
    }
}

/// FIFO queue held in memory. Nothing survives a restart.
pub struct InMemoryJobQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
}

impl InMemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Jobs waiting to be claimed.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Jobs claimed but not yet completed or failed.
    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Jobs acknowledged so far.
    pub fn completed_count(&self) -> usize {
        self.inner.lock().completed
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().dead_letters.clone()
    }

    /// `true` once nothing is pending or in flight.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.is_empty() && inner.in_flight.is_empty()
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, execution_id: Uuid, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let job = Job {
            id: Uuid::new_v4(),
            execution_id,
            payload,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            enqueued_at: Utc::now(),
        };
        let id = job.id;
        self.inner.lock().pending.push_back(job);
        debug!(job_id = %id, execution_id = %execution_id, "job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut inner = self.inner.lock();
        inner.reclaim_expired(self.config.visibility_timeout);

        let Some(mut job) = inner.pending.pop_front() else {
            return Ok(None);
        };
        job.attempts += 1;
        inner.in_flight.insert(job.id, Claim { job: job.clone(), claimed_at: Instant::now() });
        Ok(Some(job))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        inner.release(job_id)?;
        inner.completed += 1;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome, QueueError> {
        let mut inner = self.inner.lock();
        let job = inner.release(job_id)?;

        if job.attempts >= job.max_attempts {
            warn!(job_id = %job_id, attempts = job.attempts, "job dead-lettered: {error}");
            inner.dead_letters.push(DeadLetter { job, error: error.to_owned() });
            Ok(FailOutcome::DeadLettered)
        } else {
            debug!(job_id = %job_id, attempts = job.attempts, "job requeued: {error}");
            inner.pending.push_back(job);
            Ok(FailOutcome::Requeued)
        }
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let job = inner.release(job_id)?;
        warn!(job_id = %job_id, "job dead-lettered: {error}");
        inner.dead_letters.push(DeadLetter { job, error: error.to_owned() });
        Ok(())
    }
}
