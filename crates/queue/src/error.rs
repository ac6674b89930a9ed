//! Queue error type.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The job is not (or no longer) claimed by a worker.
    #[error("unknown job {0}")]
    UnknownJob(Uuid),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
