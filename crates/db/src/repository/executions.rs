//! Execution and node-completion repository functions.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionUpdate, NodeCompletionRow, WorkflowExecutionRow},
};

const EXECUTION_COLUMNS: &str = "id, workflow_id, status, current_node_id, payload, \
     triggered_by, error_message, started_at, completed_at";

const COMPLETION_COLUMNS: &str = "id, execution_id, node_id, status, error_message, recorded_at";

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Insert a new workflow execution record in `pending` status.
///
/// `definition` is the snapshot of the workflow the run will follow.
pub async fn create_execution(
    pool: &PgPool,
    id: Uuid,
    workflow_id: Uuid,
    definition: serde_json::Value,
    payload: serde_json::Value,
    triggered_by: Option<&str>,
    started_at: DateTime<Utc>,
) -> Result<WorkflowExecutionRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_id, status, definition, payload, triggered_by, started_at)
        VALUES ($1, $2, 'pending', $3, $4, $5, $6)
        RETURNING {EXECUTION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(workflow_id)
    .bind(definition)
    .bind(payload)
    .bind(triggered_by)
    .bind(started_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single execution by its primary key.
pub async fn get_execution(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<WorkflowExecutionRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// The workflow snapshot stored with an execution.
///
/// Returns `DbError::NotFound` if the execution does not exist.
pub async fn get_execution_definition(
    pool: &PgPool,
    id: Uuid,
) -> Result<serde_json::Value, DbError> {
    sqlx::query_scalar("SELECT definition FROM workflow_executions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Apply `update` to a non-terminal execution.
///
/// Returns `DbError::Conflict` when the row is missing or already
/// `completed`/`failed`.
pub async fn update_execution(
    pool: &PgPool,
    id: Uuid,
    update: ExecutionUpdate,
) -> Result<(), DbError> {
    apply_update(pool, id, update).await
}

/// Append a node-log entry and apply `update` in one transaction.
///
/// Returns `DbError::Conflict`, with nothing written, when the execution is
/// missing or already terminal.
pub async fn record_step(
    pool: &PgPool,
    id: Uuid,
    node_id: &str,
    node_status: &str,
    error_message: Option<&str>,
    recorded_at: DateTime<Utc>,
    update: ExecutionUpdate,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    apply_update(&mut *tx, id, update).await?;
    insert_completion(&mut *tx, id, node_id, node_status, error_message, recorded_at).await?;
    tx.commit().await?;
    Ok(())
}

async fn apply_update<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    update: ExecutionUpdate,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status          = $2,
            current_node_id = COALESCE($3, current_node_id),
            payload         = COALESCE($4, payload),
            error_message   = COALESCE($5, error_message),
            completed_at    = COALESCE($6, completed_at)
        WHERE id = $1
          AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(id)
    .bind(&update.status)
    .bind(update.current_node_id)
    .bind(update.payload)
    .bind(update.error_message)
    .bind(update.completed_at)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::Conflict(format!(
            "execution {id} is missing or already terminal"
        )));
    }

    Ok(())
}

/// Executions of one workflow, newest first.
pub async fn list_executions_for_workflow(
    pool: &PgPool,
    workflow_id: Uuid,
    limit: Option<i64>,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        r#"
        SELECT {EXECUTION_COLUMNS}
        FROM workflow_executions
        WHERE workflow_id = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#
    ))
    .bind(workflow_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// node_completions
// ---------------------------------------------------------------------------

/// Append one entry to an execution's node log.
pub async fn insert_node_completion(
    pool: &PgPool,
    execution_id: Uuid,
    node_id: &str,
    status: &str,
    error_message: Option<&str>,
    recorded_at: DateTime<Utc>,
) -> Result<NodeCompletionRow, DbError> {
    insert_completion(pool, execution_id, node_id, status, error_message, recorded_at).await
}

async fn insert_completion<'e>(
    executor: impl PgExecutor<'e>,
    execution_id: Uuid,
    node_id: &str,
    status: &str,
    error_message: Option<&str>,
    recorded_at: DateTime<Utc>,
) -> Result<NodeCompletionRow, DbError> {
    let row = sqlx::query_as::<_, NodeCompletionRow>(&format!(
        r#"
        INSERT INTO node_completions (execution_id, node_id, status, error_message, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {COMPLETION_COLUMNS}
        "#
    ))
    .bind(execution_id)
    .bind(node_id)
    .bind(status)
    .bind(error_message)
    .bind(recorded_at)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// The node log of one execution in append order.
pub async fn list_node_completions(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<NodeCompletionRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeCompletionRow>(&format!(
        r#"
        SELECT {COMPLETION_COLUMNS}
        FROM node_completions
        WHERE execution_id = $1
        ORDER BY id ASC
        "#
    ))
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
