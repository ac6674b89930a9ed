//! Postgres-backed stores, built on the `db` crate's repository functions.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use db::models::{ExecutionUpdate, NodeCompletionRow, WorkflowExecutionRow, WorkflowRow};
use db::repository::{executions as exec_repo, workflows as wf_repo};
use db::{DbError, DbPool};
use nodes::Payload;

use super::{
    ExecutionPatch, ExecutionStateStore, NewExecution, NodeVisit, StoreError, WorkflowStore,
};
use crate::models::{
    ExecutionRecord, ExecutionStatus, NodeCompletionRecord, NodeCompletionStatus, NodeGraph,
    WorkflowDefinition,
};

/// Implements [`WorkflowStore`] and [`ExecutionStateStore`] on one pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The conditional update cannot tell "missing" from "terminal".
    async fn explain_conflict(&self, id: Uuid) -> StoreError {
        match exec_repo::get_execution(&self.pool, id).await {
            Ok(Some(_)) => StoreError::TerminalExecution(id),
            Ok(None) => StoreError::ExecutionNotFound(id),
            Err(e) => e.into(),
        }
    }
}

fn execution_update(status: ExecutionStatus, patch: ExecutionPatch) -> ExecutionUpdate {
    ExecutionUpdate {
        status: status.to_string(),
        current_node_id: patch.current_node_id,
        payload: patch.payload.map(Value::Object),
        error_message: patch.error_message,
        completed_at: patch.completed_at,
    }
}

/// Shape of the `workflows.definition` column.
#[derive(Deserialize)]
struct GraphDocument {
    nodes: NodeGraph,
}

fn definition_from_row(row: WorkflowRow) -> Result<WorkflowDefinition, StoreError> {
    let doc: GraphDocument = serde_json::from_value(row.definition)
        .map_err(|e| StoreError::Corrupt(format!("workflow {}: {e}", row.id)))?;
    Ok(WorkflowDefinition {
        id: row.id,
        name: row.name,
        active: row.is_active,
        nodes: doc.nodes,
    })
}

fn payload_from_value(value: Value, execution_id: Uuid) -> Result<Payload, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Corrupt(format!(
            "execution {execution_id}: payload is not an object: {other}"
        ))),
    }
}

fn record_from_row(row: WorkflowExecutionRow) -> Result<ExecutionRecord, StoreError> {
    let status = row
        .status
        .parse::<ExecutionStatus>()
        .map_err(StoreError::Corrupt)?;
    Ok(ExecutionRecord {
        payload: payload_from_value(row.payload, row.id)?,
        id: row.id,
        workflow_id: row.workflow_id,
        status,
        current_node_id: row.current_node_id,
        triggered_by: row.triggered_by,
        started_at: row.started_at,
        completed_at: row.completed_at,
        error_message: row.error_message,
    })
}

fn completion_from_row(row: NodeCompletionRow) -> Result<NodeCompletionRecord, StoreError> {
    Ok(NodeCompletionRecord {
        status: row.status.parse().map_err(StoreError::Corrupt)?,
        execution_id: row.execution_id,
        node_id: row.node_id,
        error_message: row.error_message,
        timestamp: row.recorded_at,
    })
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        wf_repo::get_workflow(&self.pool, id)
            .await?
            .map(definition_from_row)
            .transpose()
    }
}

#[async_trait]
impl ExecutionStateStore for PgStore {
    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRecord, StoreError> {
        let snapshot = serde_json::to_value(&new.definition)
            .map_err(|e| StoreError::Corrupt(format!("workflow {}: {e}", new.definition.id)))?;
        let row = exec_repo::create_execution(
            &self.pool,
            Uuid::new_v4(),
            new.definition.id,
            snapshot,
            Value::Object(new.payload),
            new.triggered_by.as_deref(),
            Utc::now(),
        )
        .await?;
        record_from_row(row)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        exec_repo::get_execution(&self.pool, id)
            .await?
            .map(record_from_row)
            .transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        match exec_repo::update_execution(&self.pool, id, execution_update(status, patch)).await {
            Ok(()) => Ok(()),
            Err(DbError::Conflict(_)) => Err(self.explain_conflict(id).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_step(
        &self,
        id: Uuid,
        visit: &NodeVisit,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        let result = exec_repo::record_step(
            &self.pool,
            id,
            &visit.node_id,
            visit.status.as_str(),
            visit.error_message.as_deref(),
            Utc::now(),
            execution_update(status, patch),
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(DbError::Conflict(_)) => Err(self.explain_conflict(id).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_node_completion(
        &self,
        id: Uuid,
        node_id: &str,
        status: NodeCompletionStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        exec_repo::insert_node_completion(
            &self.pool,
            id,
            node_id,
            status.as_str(),
            error_message,
            Utc::now(),
        )
        .await?;
        Ok(())
    }

    async fn node_completions(&self, id: Uuid) -> Result<Vec<NodeCompletionRecord>, StoreError> {
        exec_repo::list_node_completions(&self.pool, id)
            .await?
            .into_iter()
            .map(completion_from_row)
            .collect()
    }

    async fn workflow_for_execution(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        match exec_repo::get_execution_definition(&self.pool, id).await {
            Ok(snapshot) => serde_json::from_value(snapshot)
                .map_err(|e| StoreError::Corrupt(format!("execution {id}: definition snapshot: {e}"))),
            Err(DbError::NotFound) => Err(StoreError::ExecutionNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        exec_repo::list_executions_for_workflow(&self.pool, workflow_id, limit)
            .await?
            .into_iter()
            .map(record_from_row)
            .collect()
    }
}
