//! In-memory implementation of both store traits.
//!
//! Used by the tests and by the `run` command. Same semantics as the
//! Postgres store, nothing survives the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    ExecutionPatch, ExecutionStateStore, NewExecution, NodeVisit, StoreError, WorkflowStore,
};
use crate::models::{
    ExecutionRecord, ExecutionStatus, NodeCompletionRecord, NodeCompletionStatus,
    WorkflowDefinition,
};

#[derive(Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<Uuid, WorkflowDefinition>>,
    executions: RwLock<HashMap<Uuid, ExecutionRecord>>,
    completions: RwLock<HashMap<Uuid, Vec<NodeCompletionRecord>>>,
    /// Definition each execution was created from, keyed by execution id.
    snapshots: RwLock<HashMap<Uuid, WorkflowDefinition>>,
}

fn apply_patch(record: &mut ExecutionRecord, status: ExecutionStatus, patch: ExecutionPatch) {
    record.status = status;
    if let Some(node_id) = patch.current_node_id {
        record.current_node_id = Some(node_id);
    }
    if let Some(payload) = patch.payload {
        record.payload = payload;
    }
    if let Some(message) = patch.error_message {
        record.error_message = Some(message);
    }
    if let Some(at) = patch.completed_at {
        record.completed_at = Some(at);
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a definition, replacing any with the same id.
    pub fn insert_workflow(&self, definition: WorkflowDefinition) {
        self.workflows.write().insert(definition.id, definition);
    }

    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.workflows.read().get(&id).cloned())
    }
}

#[async_trait]
impl ExecutionStateStore for InMemoryStore {
    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRecord, StoreError> {
        let workflow_id = new.definition.id;
        if !self.workflows.read().contains_key(&workflow_id) {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }

        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            current_node_id: None,
            payload: new.payload,
            triggered_by: new.triggered_by,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        self.snapshots.write().insert(record.id, new.definition);
        self.executions.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let record = executions
            .get_mut(&id)
            .ok_or(StoreError::ExecutionNotFound(id))?;

        if record.status.is_terminal() {
            return Err(StoreError::TerminalExecution(id));
        }

        apply_patch(record, status, patch);
        Ok(())
    }

    async fn record_step(
        &self,
        id: Uuid,
        visit: &NodeVisit,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        // Lock order: executions, then completions.
        let mut executions = self.executions.write();
        let mut completions = self.completions.write();

        let record = executions
            .get_mut(&id)
            .ok_or(StoreError::ExecutionNotFound(id))?;
        if record.status.is_terminal() {
            return Err(StoreError::TerminalExecution(id));
        }

        completions.entry(id).or_default().push(NodeCompletionRecord {
            execution_id: id,
            node_id: visit.node_id.clone(),
            status: visit.status,
            error_message: visit.error_message.clone(),
            timestamp: Utc::now(),
        });
        apply_patch(record, status, patch);
        Ok(())
    }

    async fn record_node_completion(
        &self,
        id: Uuid,
        node_id: &str,
        status: NodeCompletionStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        if !self.executions.read().contains_key(&id) {
            return Err(StoreError::ExecutionNotFound(id));
        }

        self.completions
            .write()
            .entry(id)
            .or_default()
            .push(NodeCompletionRecord {
                execution_id: id,
                node_id: node_id.to_owned(),
                status,
                error_message: error_message.map(str::to_owned),
                timestamp: Utc::now(),
            });
        Ok(())
    }

    async fn node_completions(&self, id: Uuid) -> Result<Vec<NodeCompletionRecord>, StoreError> {
        Ok(self.completions.read().get(&id).cloned().unwrap_or_default())
    }

    async fn workflow_for_execution(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        self.snapshots
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(id))
    }

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records: Vec<ExecutionRecord> = self
            .executions
            .read()
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
