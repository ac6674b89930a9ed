//! Workflow runner.
//!
//! `WorkflowRunner` is the engine's only writer of execution state:
//! 1. [`WorkflowRunner::start_workflow`] creates the record and schedules
//!    the `start` node as the first step.
//! 2. A worker hands each dequeued step to [`WorkflowRunner::process_step`],
//!    which runs exactly one node, persists the transition planned by
//!    [`crate::machine::plan_step`], publishes its events and, unless the
//!    run has ended, enqueues the next step.
//!
//! Only the step that just finished schedules the following one, so an
//! execution never has more than one step in flight.
//!
//! Executors run on their own task. A panic inside one fails the node like
//! any other executor error.

use std::any::Any;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use nodes::{ExecutionContext, ExecutorRegistry, NodeError, Outcome, Payload};
use queue::JobQueue;

use crate::error::EngineError;
use crate::events::{EventPublisher, WorkflowEvent};
use crate::machine::{plan_abandon, plan_step, StepPlan, Transition};
use crate::models::{
    ExecutionDetails, ExecutionRecord, ExecutionStats, ExecutionStatus, StepDescriptor,
};
use crate::store::{ExecutionPatch, ExecutionStateStore, NewExecution, StoreError, WorkflowStore};

// ---------------------------------------------------------------------------
// StepDisposition
// ---------------------------------------------------------------------------

/// What processing one step did to its execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDisposition {
    /// The node completed and the next step was enqueued.
    Scheduled { next_node_id: String },
    /// The node completed and routed to `end`.
    Completed,
    /// The run was failed.
    Failed { error_message: String },
    /// The execution was already terminal; nothing was run or written.
    Discarded,
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

pub struct WorkflowRunner {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStateStore>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<ExecutorRegistry>,
    events: Arc<dyn EventPublisher>,
}

impl WorkflowRunner {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStateStore>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<ExecutorRegistry>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { workflows, executions, queue, registry, events }
    }

    /// The queue steps are scheduled on. Workers poll the same queue.
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Trigger a new run of `workflow_id` and return its execution id.
    ///
    /// # Errors
    /// Fails synchronously only for problems found before the first step is
    /// enqueued: unknown or inactive workflow, missing `start` node, or the
    /// store/queue being unavailable. Once the first step is enqueued every
    /// failure is reported on the execution record instead.
    #[instrument(skip(self, payload), fields(%workflow_id))]
    pub async fn start_workflow(
        &self,
        workflow_id: Uuid,
        payload: Payload,
        triggered_by: Option<String>,
    ) -> Result<Uuid, EngineError> {
        let definition = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        if !definition.active {
            return Err(EngineError::WorkflowInactive(workflow_id));
        }
        let start = definition
            .start_node()
            .cloned()
            .ok_or(EngineError::MissingStartNode(workflow_id))?;

        let record = self
            .executions
            .create_execution(NewExecution {
                definition,
                payload,
                triggered_by,
            })
            .await?;
        let execution_id = record.id;

        self.events.publish(WorkflowEvent::WorkflowStarted { execution_id, workflow_id });

        let first = StepDescriptor {
            execution_id,
            node: start,
            payload: record.payload,
        };
        if let Err(err) = self.enqueue(&first).await {
            error!(%execution_id, error = %err, "failed to schedule first step");
            self.fail_unscheduled(execution_id, &err).await;
            return Err(err);
        }

        info!(%execution_id, "workflow execution started");
        Ok(execution_id)
    }

    /// Process one step: run its node and apply the resulting transition.
    ///
    /// # Errors
    /// Only for conditions the run itself cannot absorb: the execution does
    /// not exist, or a store/queue call failed. Configuration and executor
    /// failures fail the run and return `Ok(StepDisposition::Failed)`.
    #[instrument(
        skip(self, step),
        fields(execution_id = %step.execution_id, node_id = %step.node.id, node_type = %step.node.node_type)
    )]
    pub async fn process_step(&self, step: StepDescriptor) -> Result<StepDisposition, EngineError> {
        let execution_id = step.execution_id;
        let Some(record) = self.live_execution(execution_id).await? else {
            return Ok(StepDisposition::Discarded);
        };

        match self
            .executions
            .update_status(execution_id, ExecutionStatus::InProgress, ExecutionPatch::at_node(&step.node.id))
            .await
        {
            Ok(()) => {}
            Err(StoreError::TerminalExecution(_)) => {
                warn!("execution turned terminal before the step started; discarding");
                return Ok(StepDisposition::Discarded);
            }
            Err(e) => return Err(e.into()),
        }

        let definition = self.executions.workflow_for_execution(execution_id).await?;
        let ctx = ExecutionContext {
            workflow_id: record.workflow_id,
            execution_id,
            triggered_by: record.triggered_by,
            started_at: record.started_at,
        };

        let result = self.run_node(&step, &ctx).await;
        let plan = plan_step(&definition, &step, result, Utc::now());
        self.apply(execution_id, plan).await
    }

    /// Fail the run that owns `step` without running the node. Used once the
    /// host queue has given up redelivering the step.
    #[instrument(skip(self, step), fields(execution_id = %step.execution_id, node_id = %step.node.id))]
    pub async fn abandon_step(
        &self,
        step: &StepDescriptor,
        error_message: &str,
    ) -> Result<StepDisposition, EngineError> {
        if self.live_execution(step.execution_id).await?.is_none() {
            return Ok(StepDisposition::Discarded);
        }
        let plan = plan_abandon(step, error_message.to_owned(), Utc::now());
        self.apply(step.execution_id, plan).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// A record together with its node log.
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionDetails, EngineError> {
        let record = self
            .executions
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        let nodes = self.executions.node_completions(execution_id).await?;
        Ok(ExecutionDetails { record, nodes })
    }

    /// Runs of `workflow_id`, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>, EngineError> {
        self.require_workflow(workflow_id).await?;
        Ok(self.executions.list_executions(workflow_id, limit).await?)
    }

    pub async fn execution_stats(&self, workflow_id: Uuid) -> Result<ExecutionStats, EngineError> {
        self.require_workflow(workflow_id).await?;
        let records = self.executions.list_executions(workflow_id, None).await?;
        Ok(ExecutionStats::from_records(workflow_id, &records))
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    async fn require_workflow(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        match self.workflows.get_workflow(workflow_id).await? {
            Some(_) => Ok(()),
            None => Err(EngineError::WorkflowNotFound(workflow_id)),
        }
    }

    /// The execution's record, or `None` if it already ended.
    async fn live_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>, EngineError> {
        let record = self
            .executions
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        if record.status.is_terminal() {
            warn!(%execution_id, status = %record.status, "step delivered for finished execution; discarding");
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn run_node(&self, step: &StepDescriptor, ctx: &ExecutionContext) -> Result<Outcome, EngineError> {
        let executor = self
            .registry
            .resolve(&step.node.node_type)
            .map_err(|_| EngineError::UnknownNodeType {
                node_id: step.node.id.clone(),
                node_type: step.node.node_type.clone(),
            })?;

        let node = step.node.clone();
        let payload = step.payload.clone();
        let ctx = ctx.clone();
        let task = tokio::spawn(
            async move { executor.execute(&node, &payload, &ctx).await }.in_current_span(),
        );

        debug!("executing node");
        let result = match task.await {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                error!(panic = %message, "node executor panicked");
                Err(NodeError::failed(format!("executor panicked: {message}")))
            }
            Err(join) => Err(NodeError::failed(format!("executor task cancelled: {join}"))),
        };

        result.map_err(|source| EngineError::Executor {
            node_id: step.node.id.clone(),
            source,
        })
    }

    /// Persist `plan`, publish its events and carry out its transition.
    async fn apply(&self, execution_id: Uuid, plan: StepPlan) -> Result<StepDisposition, EngineError> {
        let StepPlan { visit, status, patch, transition, events } = plan;

        match self.executions.record_step(execution_id, &visit, status, patch).await {
            Ok(()) => {}
            Err(StoreError::TerminalExecution(_)) => {
                warn!(%execution_id, "execution finished while the step ran; discarding its result");
                return Ok(StepDisposition::Discarded);
            }
            Err(e) => return Err(e.into()),
        }

        for event in events {
            self.events.publish(event);
        }

        let disposition = match transition {
            Transition::Continue { next } => {
                self.enqueue(&next).await?;
                debug!(next = %next.node.id, "next step scheduled");
                StepDisposition::Scheduled { next_node_id: next.node.id }
            }
            Transition::Complete => {
                info!(%execution_id, "workflow execution completed");
                StepDisposition::Completed
            }
            Transition::Fail { error_message } => {
                warn!(%execution_id, error = %error_message, "workflow execution failed");
                StepDisposition::Failed { error_message }
            }
        };
        Ok(disposition)
    }

    async fn enqueue(&self, step: &StepDescriptor) -> Result<Uuid, EngineError> {
        let payload = step.to_job_payload()?;
        Ok(self.queue.enqueue(step.execution_id, payload).await?)
    }

    /// Best-effort failure of a run whose first step never made it onto the
    /// queue.
    async fn fail_unscheduled(&self, execution_id: Uuid, err: &EngineError) {
        let error_message = err.to_string();
        let patch = ExecutionPatch {
            error_message: Some(error_message.clone()),
            completed_at: Some(Utc::now()),
            ..ExecutionPatch::default()
        };
        match self.executions.update_status(execution_id, ExecutionStatus::Failed, patch).await {
            Ok(()) => self.events.publish(WorkflowEvent::WorkflowFailed { execution_id, error_message }),
            Err(e) => error!(%execution_id, error = %e, "could not mark unscheduled execution failed"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
