//! Read-only workflow lookups. Definitions are written by the surrounding
//! application, never by the engine.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WorkflowRow};

const WORKFLOW_COLUMNS: &str = "w.id, w.name, w.definition, w.is_active, w.created_at";

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows w WHERE w.id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
