//! The per-step state machine.
//!
//! [`plan_step`] turns the result of one node visit into a [`StepPlan`]:
//! the log entry to append, the status and patch to write, what happens
//! next and which events to publish. It touches no store, queue or bus, so
//! every transition can be tested on plain values. The runner applies the
//! plan.

use chrono::{DateTime, Utc};
use tracing::debug;

use nodes::{Outcome, Payload};

use crate::error::EngineError;
use crate::events::WorkflowEvent;
use crate::models::{
    ExecutionStatus, NodeCompletionStatus, StepDescriptor, WorkflowDefinition, END_NODE,
};
use crate::store::{ExecutionPatch, NodeVisit};

/// Where the run goes after this step.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Schedule `next` as a new step.
    Continue { next: StepDescriptor },
    /// The run routed to `end`.
    Complete,
    /// The run halts with `error_message`.
    Fail { error_message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepPlan {
    pub visit: NodeVisit,
    pub status: ExecutionStatus,
    pub patch: ExecutionPatch,
    pub transition: Transition,
    /// Published in order once the plan has been persisted.
    pub events: Vec<WorkflowEvent>,
}

/// Shallow merge: keys from `outcome` replace same-named keys in `payload`,
/// everything else survives.
pub fn merge_outcome(payload: &Payload, outcome: Payload) -> Payload {
    let mut merged = payload.clone();
    merged.extend(outcome);
    merged
}

/// Plan the transition for `step` given what its executor returned.
///
/// `result` is `Err` when the node could not run at all (unknown type) or
/// its executor failed. Routing is resolved here, before anything is
/// persisted, so a bad target is logged as the node's own failure.
pub fn plan_step(
    definition: &WorkflowDefinition,
    step: &StepDescriptor,
    result: Result<Outcome, EngineError>,
    now: DateTime<Utc>,
) -> StepPlan {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => return fail(step, err, now),
    };

    let (data, routed) = outcome.into_parts();
    let next_id = routed
        .or_else(|| step.node.next.clone())
        .unwrap_or_else(|| END_NODE.to_owned());
    debug!(node_id = %step.node.id, next = %next_id, "resolved route");

    if next_id == END_NODE {
        let payload = merge_outcome(&step.payload, data);
        return StepPlan {
            visit: completed(step),
            status: ExecutionStatus::Completed,
            patch: ExecutionPatch {
                current_node_id: Some(step.node.id.clone()),
                payload: Some(payload.clone()),
                completed_at: Some(now),
                ..ExecutionPatch::default()
            },
            transition: Transition::Complete,
            events: vec![
                processed(step, payload),
                WorkflowEvent::WorkflowCompleted { execution_id: step.execution_id },
            ],
        };
    }

    let Some(next_node) = definition.node(&next_id) else {
        let err = EngineError::UnknownNode {
            from: step.node.id.clone(),
            target: next_id,
        };
        return fail(step, err, now);
    };

    let payload = merge_outcome(&step.payload, data);
    StepPlan {
        visit: completed(step),
        status: ExecutionStatus::InProgress,
        patch: ExecutionPatch {
            current_node_id: Some(step.node.id.clone()),
            payload: Some(payload.clone()),
            ..ExecutionPatch::default()
        },
        transition: Transition::Continue {
            next: StepDescriptor {
                execution_id: step.execution_id,
                node: next_node.clone(),
                payload: payload.clone(),
            },
        },
        events: vec![processed(step, payload)],
    }
}

/// Plan for a step that has to be abandoned without running its node, e.g.
/// after the host queue gave up on it.
pub fn plan_abandon(step: &StepDescriptor, error_message: String, now: DateTime<Utc>) -> StepPlan {
    failure_plan(step, error_message, now)
}

fn fail(step: &StepDescriptor, err: EngineError, now: DateTime<Utc>) -> StepPlan {
    failure_plan(step, err.to_string(), now)
}

fn failure_plan(step: &StepDescriptor, error_message: String, now: DateTime<Utc>) -> StepPlan {
    StepPlan {
        visit: NodeVisit {
            node_id: step.node.id.clone(),
            status: NodeCompletionStatus::Failed,
            error_message: Some(error_message.clone()),
        },
        status: ExecutionStatus::Failed,
        patch: ExecutionPatch {
            current_node_id: Some(step.node.id.clone()),
            error_message: Some(error_message.clone()),
            completed_at: Some(now),
            ..ExecutionPatch::default()
        },
        transition: Transition::Fail { error_message: error_message.clone() },
        events: vec![WorkflowEvent::WorkflowFailed {
            execution_id: step.execution_id,
            error_message,
        }],
    }
}

fn completed(step: &StepDescriptor) -> NodeVisit {
    NodeVisit {
        node_id: step.node.id.clone(),
        status: NodeCompletionStatus::Completed,
        error_message: None,
    }
}

fn processed(step: &StepDescriptor, payload: Payload) -> WorkflowEvent {
    WorkflowEvent::WorkflowNodeProcessed {
        execution_id: step.execution_id,
        node_id: step.node.id.clone(),
        node_type: step.node.node_type.clone(),
        payload,
        status: NodeCompletionStatus::Completed,
    }
}
