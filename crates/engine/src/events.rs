//! Lifecycle events and the publisher they are handed to.
//!
//! Publishing is fire-and-forget: the engine never waits on listeners and a
//! bus with no subscribers silently drops events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use nodes::Payload;

use crate::models::NodeCompletionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
    },
    WorkflowNodeProcessed {
        execution_id: Uuid,
        node_id: String,
        node_type: String,
        /// Payload after the node's outcome was merged in.
        payload: Payload,
        status: NodeCompletionStatus,
    },
    WorkflowCompleted {
        execution_id: Uuid,
    },
    WorkflowFailed {
        execution_id: Uuid,
        error_message: String,
    },
}

impl WorkflowEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::WorkflowStarted { execution_id, .. }
            | Self::WorkflowNodeProcessed { execution_id, .. }
            | Self::WorkflowCompleted { execution_id }
            | Self::WorkflowFailed { execution_id, .. } => *execution_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowNodeProcessed { .. } => "workflow_node_processed",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
        }
    }
}

/// Sink for lifecycle events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: WorkflowEvent);
}

/// In-process bus backed by a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than blocking the
/// engine.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for BroadcastEventBus {
    fn publish(&self, event: WorkflowEvent) {
        let name = event.name();
        let execution_id = event.execution_id();
        if self.tx.send(event).is_err() {
            debug!(event = name, %execution_id, "no event subscribers");
        }
    }
}
