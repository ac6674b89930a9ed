//! Queue backed by the `job_queue` table.

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use db::models::{JobRow, JobStatus};
use db::repository::jobs as job_repo;
use db::DbPool;

use crate::{FailOutcome, Job, JobQueue, QueueConfig, QueueError};

/// Multi-worker queue on Postgres. Claims use `FOR UPDATE SKIP LOCKED`, so
/// any number of worker processes can share one table.
pub struct PgJobQueue {
    pool: DbPool,
    config: QueueConfig,
}

impl PgJobQueue {
    pub fn new(pool: DbPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            execution_id: row.execution_id,
            payload: row.payload,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(1),
            enqueued_at: row.created_at,
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, execution_id: Uuid, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let max_attempts = i32::try_from(self.config.max_attempts).unwrap_or(i32::MAX);
        let row = job_repo::enqueue_job(&self.pool, execution_id, payload, max_attempts).await?;
        Ok(row.id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        Ok(job_repo::fetch_next_job(&self.pool, self.config.visibility_timeout)
            .await?
            .map(Job::from))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        job_repo::complete_job(&self.pool, job_id)
            .await
            .map_err(|e| not_found_as_unknown(e, job_id))
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome, QueueError> {
        match job_repo::fail_job(&self.pool, job_id, error).await {
            Ok(JobStatus::DeadLettered) => {
                warn!(job_id = %job_id, "job dead-lettered: {error}");
                Ok(FailOutcome::DeadLettered)
            }
            Ok(_) => Ok(FailOutcome::Requeued),
            Err(e) => Err(not_found_as_unknown(e, job_id)),
        }
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        job_repo::dead_letter_job(&self.pool, job_id, error)
            .await
            .map_err(|e| not_found_as_unknown(e, job_id))
    }
}

fn not_found_as_unknown(err: db::DbError, job_id: Uuid) -> QueueError {
    match err {
        db::DbError::NotFound => QueueError::UnknownJob(job_id),
        other => QueueError::Database(other),
    }
}
