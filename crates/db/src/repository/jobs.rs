//! Job queue repository functions.
//!
//! The queue is backed by the `job_queue` Postgres table.
//! Workers poll the table and use `SELECT … FOR UPDATE SKIP LOCKED`
//! for safe concurrent processing. A `processing` row whose `claimed_at`
//! is older than the caller's visibility timeout is claimable again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::{DbError, models::{JobRow, JobStatus}};

const JOB_COLUMNS: &str = "id, execution_id, status, attempts, max_attempts, payload, \
     last_error, claimed_at, created_at, updated_at";

/// Enqueue a new job for the given execution.
///
/// `payload` is arbitrary JSON that the worker will pass back to the engine.
pub async fn enqueue_job(
    pool: &PgPool,
    execution_id: Uuid,
    payload: serde_json::Value,
    max_attempts: i32,
) -> Result<JobRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        INSERT INTO job_queue
            (id, execution_id, status, attempts, max_attempts, payload, created_at, updated_at)
        VALUES ($1, $2, $3, 0, $4, $5, $6, $6)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(execution_id)
    .bind(JobStatus::Pending.as_str())
    .bind(max_attempts)
    .bind(payload)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically fetch the oldest claimable job and mark it as `processing`.
///
/// A job is claimable when it is `pending`, or `processing` with a claim
/// older than `visibility_timeout`. Uses `SELECT … FOR UPDATE SKIP LOCKED`
/// so multiple workers can poll safely without stepping on each other.
///
/// Returns `None` if nothing is claimable.
pub async fn fetch_next_job(
    pool: &PgPool,
    visibility_timeout: Duration,
) -> Result<Option<JobRow>, DbError> {
    let now = Utc::now();
    let lease_cutoff = chrono::Duration::from_std(visibility_timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM job_queue
        WHERE status = $1
           OR (status = $2 AND claimed_at < $3)
        ORDER BY created_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#
    ))
    .bind(JobStatus::Pending.as_str())
    .bind(JobStatus::Processing.as_str())
    .bind(lease_cutoff)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(mut job) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    if job.status == JobStatus::Processing.as_str() {
        warn!(job_id = %job.id, attempts = job.attempts, "job lease expired; reclaiming");
    }

    sqlx::query(
        r#"
        UPDATE job_queue
        SET status = $1, attempts = attempts + 1, claimed_at = $2, updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(JobStatus::Processing.as_str())
    .bind(now)
    .bind(job.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    job.status = JobStatus::Processing.to_string();
    job.attempts += 1;
    job.claimed_at = Some(now);
    job.updated_at = now;
    Ok(Some(job))
}

/// Mark a job as completed.
pub async fn complete_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    set_status(pool, job_id, JobStatus::Completed, None).await
}

/// Return a job to `pending`, or dead-letter it once `max_attempts` is
/// reached. Returns the status the job ended up in.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<JobStatus, DbError> {
    let dead: bool = sqlx::query_scalar(
        r#"
        UPDATE job_queue
        SET status = CASE WHEN attempts >= max_attempts THEN $1 ELSE $2 END,
            last_error = $3,
            claimed_at = NULL,
            updated_at = $4
        WHERE id = $5
        RETURNING status = $1
        "#,
    )
    .bind(JobStatus::DeadLettered.as_str())
    .bind(JobStatus::Pending.as_str())
    .bind(error)
    .bind(Utc::now())
    .bind(job_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(if dead { JobStatus::DeadLettered } else { JobStatus::Pending })
}

/// Move a job straight to the dead-letter state.
pub async fn dead_letter_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<(), DbError> {
    set_status(pool, job_id, JobStatus::DeadLettered, Some(error)).await
}

async fn set_status(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    error: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE job_queue
        SET status = $1, last_error = COALESCE($2, last_error), updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(Utc::now())
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
