//! End-to-end tests for the workflow runner and worker.
//!
//! Everything runs against the in-memory store and queue with `MockNode`
//! executors, so no Postgres connection is required.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use nodes::mock::MockNode;
use nodes::{
    ExecutionContext, ExecutorRegistry, NodeConfig, NodeError, NodeExecutor, Outcome, Payload,
    RegistryBuilder,
};
use queue::{FailOutcome, InMemoryJobQueue, JobQueue, QueueConfig, QueueError};

use crate::events::{EventPublisher, WorkflowEvent};
use crate::models::{ExecutionStatus, NodeCompletionStatus, StepDescriptor, WorkflowDefinition};
use crate::runner::{StepDisposition, WorkflowRunner};
use crate::store::{
    ExecutionPatch, ExecutionStateStore, InMemoryStore, NewExecution, NodeVisit, StoreError,
};
use crate::worker::{Worker, WorkerConfig};
use crate::{EngineError, ExecutionRecord, NodeCompletionRecord};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl RecordingPublisher {
    fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(WorkflowEvent::name).collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: WorkflowEvent) {
        self.events.lock().push(event);
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    queue: Arc<InMemoryJobQueue>,
    events: Arc<RecordingPublisher>,
    runner: Arc<WorkflowRunner>,
    worker: Worker,
}

impl Harness {
    fn new(registry: RegistryBuilder) -> Self {
        Self::with_stores(registry, Arc::new(InMemoryStore::new()), None, QueueConfig::default())
    }

    fn with_stores(
        registry: RegistryBuilder,
        store: Arc<InMemoryStore>,
        executions: Option<Arc<dyn ExecutionStateStore>>,
        queue_config: QueueConfig,
    ) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new(queue_config));
        let events = Arc::new(RecordingPublisher::default());
        let executions =
            executions.unwrap_or_else(|| store.clone() as Arc<dyn ExecutionStateStore>);
        let runner = Arc::new(WorkflowRunner::new(
            store.clone(),
            executions,
            queue.clone(),
            Arc::new(registry.build()),
            events.clone(),
        ));
        let worker = Worker::new(runner.clone(), WorkerConfig::default());
        Self { store, queue, events, runner, worker }
    }

    fn deploy(&self, definition: WorkflowDefinition) -> Uuid {
        let id = definition.id;
        self.store.insert_workflow(definition);
        id
    }

    async fn drain(&self) {
        self.worker.run_until_idle(1_000).await;
    }

    async fn record(&self, execution_id: Uuid) -> ExecutionRecord {
        self.runner.get_execution(execution_id).await.unwrap().record
    }

    async fn log(&self, execution_id: Uuid) -> Vec<NodeCompletionRecord> {
        self.runner.get_execution(execution_id).await.unwrap().nodes
    }
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn builtins() -> RegistryBuilder {
    ExecutorRegistry::builder().with_builtins()
}

fn graph(value: Value) -> WorkflowDefinition {
    serde_json::from_value(json!({ "name": "test", "nodes": value })).unwrap()
}

fn statuses(log: &[NodeCompletionRecord]) -> Vec<(&str, NodeCompletionStatus)> {
    log.iter().map(|r| (r.node_id.as_str(), r.status)).collect()
}

/// Adds one to `count` each visit and routes to `end` on the third.
struct Counter;

#[async_trait]
impl NodeExecutor for Counter {
    async fn execute(
        &self,
        _node: &NodeConfig,
        payload: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError> {
        let count = payload.get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
        let outcome = Outcome::new().with("count", count);
        Ok(if count >= 3 { outcome.route_to("end") } else { outcome })
    }
}

/// Misbehaviour injected by [`Faulty`].
enum Fault {
    /// `workflow_for_execution` always fails.
    NoDefinitions,
    /// The next `n` calls to `record_step` fail.
    StepWriteFailures(AtomicUsize),
    /// `get_execution` marks the run completed right after reading it, as a
    /// concurrent delivery would.
    FinishOnRead,
}

/// Delegates to an in-memory store, except where `fault` says otherwise.
struct Faulty {
    inner: Arc<InMemoryStore>,
    fault: Fault,
}

impl Faulty {
    fn new(inner: Arc<InMemoryStore>, fault: Fault) -> Arc<Self> {
        Arc::new(Self { inner, fault })
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("connection refused".into())
    }
}

#[async_trait]
impl ExecutionStateStore for Faulty {
    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRecord, StoreError> {
        self.inner.create_execution(new).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let record = self.inner.get_execution(id).await?;
        if matches!(self.fault, Fault::FinishOnRead) && record.is_some() {
            let finished = ExecutionPatch { completed_at: Some(chrono::Utc::now()), ..ExecutionPatch::default() };
            let _ = self.inner.update_status(id, ExecutionStatus::Completed, finished).await;
        }
        Ok(record)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        self.inner.update_status(id, status, patch).await
    }

    async fn record_step(
        &self,
        id: Uuid,
        visit: &NodeVisit,
        status: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        if let Fault::StepWriteFailures(left) = &self.fault {
            if left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                return Err(Self::unavailable());
            }
        }
        self.inner.record_step(id, visit, status, patch).await
    }

    async fn record_node_completion(
        &self,
        id: Uuid,
        node_id: &str,
        status: NodeCompletionStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.record_node_completion(id, node_id, status, error_message).await
    }

    async fn node_completions(&self, id: Uuid) -> Result<Vec<NodeCompletionRecord>, StoreError> {
        self.inner.node_completions(id).await
    }

    async fn workflow_for_execution(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        match self.fault {
            Fault::NoDefinitions => Err(Self::unavailable()),
            _ => self.inner.workflow_for_execution(id).await,
        }
    }

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.inner.list_executions(workflow_id, limit).await
    }
}

/// A queue that refuses every new job.
struct RejectingQueue;

#[async_trait]
impl JobQueue for RejectingQueue {
    async fn enqueue(&self, _execution_id: Uuid, _payload: Value) -> Result<Uuid, QueueError> {
        Err(QueueError::Database(db::DbError::Conflict("queue is full".into())))
    }

    async fn dequeue(&self) -> Result<Option<queue::Job>, QueueError> {
        Ok(None)
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        Err(QueueError::UnknownJob(job_id))
    }

    async fn fail(&self, job_id: Uuid, _error: &str) -> Result<FailOutcome, QueueError> {
        Err(QueueError::UnknownJob(job_id))
    }

    async fn dead_letter(&self, job_id: Uuid, _error: &str) -> Result<(), QueueError> {
        Err(QueueError::UnknownJob(job_id))
    }
}

/// Panics on every call.
struct Panicky;

#[async_trait]
impl NodeExecutor for Panicky {
    async fn execute(
        &self,
        _node: &NodeConfig,
        _payload: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Outcome, NodeError> {
        panic!("plugin bug: index out of bounds")
    }
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn two_node_workflow_completes() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({
        "start": { "next": "n1" },
        "n1": { "type": "noop", "next": "end" },
    })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.payload.is_empty());
    assert!(record.completed_at.is_some());
    assert_eq!(record.error_message, None);
    assert_eq!(
        statuses(&h.log(execution_id).await),
        vec![("start", NodeCompletionStatus::Completed), ("n1", NodeCompletionStatus::Completed)]
    );
    assert_eq!(h.queue.completed_count(), 2);
    assert!(h.queue.dead_letters().is_empty());
}

#[tokio::test]
async fn executor_error_fails_the_run() {
    let h = Harness::new(
        builtins().register("always-error", Arc::new(MockNode::failing("boom", "provider rejected request"))),
    );
    let workflow_id = h.deploy(graph(json!({ "start": { "type": "always-error" } })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("node 'start' failed: provider rejected request")
    );
    assert!(record.completed_at.is_some());

    let log = h.log(execution_id).await;
    assert_eq!(statuses(&log), vec![("start", NodeCompletionStatus::Failed)]);
    assert_eq!(log[0].error_message, record.error_message);
    // Executor failures are handled by the engine, not retried by the queue.
    assert_eq!(h.queue.completed_count(), 1);
}

#[tokio::test]
async fn routing_to_a_missing_node_is_a_configuration_failure() {
    let router = Arc::new(MockNode::returning("router", Outcome::new().route_to("n9")));
    let n2 = Arc::new(MockNode::returning("n2", Outcome::new()));
    let h = Harness::new(builtins().register("router", router.clone()).register("n2", n2.clone()));
    let workflow_id = h.deploy(graph(json!({
        "start": { "next": "n1" },
        "n1": { "type": "router", "next": "n2" },
        "n2": { "type": "n2" },
    })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("node 'n1' routes to unknown node 'n9'")
    );
    assert_eq!(
        statuses(&h.log(execution_id).await),
        vec![("start", NodeCompletionStatus::Completed), ("n1", NodeCompletionStatus::Failed)]
    );
    assert_eq!(router.call_count(), 1);
    assert_eq!(n2.call_count(), 0);
}

#[tokio::test]
async fn concurrent_runs_of_one_workflow_keep_separate_payloads() {
    let h = Harness::new(builtins().register(
        "tag",
        Arc::new(MockNode::returning("tag", Outcome::new().with("tagged", true))),
    ));
    let workflow_id = h.deploy(graph(json!({
        "start": { "next": "n1" },
        "n1": { "type": "tag" },
    })));

    let first = h.runner.start_workflow(workflow_id, payload(json!({ "lead": 1 })), None).await.unwrap();
    let second = h.runner.start_workflow(workflow_id, payload(json!({ "lead": 2 })), None).await.unwrap();
    assert_ne!(first, second);

    // FIFO queue: both `start` steps run before either `n1`.
    h.drain().await;

    assert_eq!(
        Value::Object(h.record(first).await.payload),
        json!({ "lead": 1, "tagged": true })
    );
    assert_eq!(
        Value::Object(h.record(second).await.payload),
        json!({ "lead": 2, "tagged": true })
    );
    assert_eq!(h.log(first).await.len(), 2);
    assert_eq!(h.log(second).await.len(), 2);
}

// ============================================================
// Routing
// ============================================================

#[tokio::test]
async fn next_node_wins_over_static_next() {
    let n2 = Arc::new(MockNode::returning("n2", Outcome::new()));
    let n3 = Arc::new(MockNode::returning("n3", Outcome::new()));
    let h = Harness::new(
        builtins()
            .register("jump", Arc::new(MockNode::returning("jump", Outcome::new().route_to("n3"))))
            .register("n2", n2.clone())
            .register("n3", n3.clone()),
    );
    let workflow_id = h.deploy(graph(json!({
        "start": { "type": "jump", "next": "n2" },
        "n2": { "type": "n2" },
        "n3": { "type": "n3" },
    })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    assert_eq!(n2.call_count(), 0);
    assert_eq!(n3.visited(), vec!["n3"]);
    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(!record.payload.contains_key(nodes::NEXT_NODE_KEY));
}

#[tokio::test]
async fn condition_node_picks_a_branch() {
    let hot = Arc::new(MockNode::returning("hot", Outcome::new()));
    let h = Harness::new(builtins().register("hot", hot.clone()));
    let workflow_id = h.deploy(graph(json!({
        "start": {
            "type": "condition",
            "parameters": {
                "field": "lead.score",
                "operator": "greater_than",
                "value": 50,
                "true_next": "hot",
            },
        },
        "hot": { "type": "hot" },
    })));

    let warm = h
        .runner
        .start_workflow(workflow_id, payload(json!({ "lead": { "score": 80 } })), None)
        .await
        .unwrap();
    let cold = h
        .runner
        .start_workflow(workflow_id, payload(json!({ "lead": { "score": 10 } })), None)
        .await
        .unwrap();
    h.drain().await;

    assert_eq!(hot.call_count(), 1);
    assert_eq!(h.log(warm).await.len(), 2);
    assert_eq!(h.log(cold).await.len(), 1);
    assert_eq!(h.record(cold).await.payload.get("condition_result"), Some(&json!(false)));
    assert_eq!(h.record(cold).await.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn cycles_run_until_a_node_routes_out() {
    let h = Harness::new(builtins().register("counter", Arc::new(Counter)));
    let workflow_id = h.deploy(graph(json!({
        "start": { "next": "loop" },
        "loop": { "type": "counter", "next": "start" },
    })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.payload.get("count"), Some(&json!(3)));
    assert_eq!(h.log(execution_id).await.len(), 6);
}

// ============================================================
// Configuration errors
// ============================================================

#[tokio::test]
async fn unknown_node_type_fails_the_run() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({ "start": { "type": "send_email" } })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("node 'start' has unknown type 'send_email'")
    );
    assert_eq!(statuses(&h.log(execution_id).await), vec![("start", NodeCompletionStatus::Failed)]);
}

#[tokio::test]
async fn missing_start_fails_before_a_record_exists() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({ "n1": { "type": "noop" } })));

    let err = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap_err();

    assert!(matches!(err, EngineError::MissingStartNode(id) if id == workflow_id));
    assert_eq!(h.store.execution_count(), 0);
    assert_eq!(h.queue.pending_len(), 0);
    assert!(h.events.names().is_empty());
}

#[tokio::test]
async fn inactive_and_unknown_workflows_cannot_start() {
    let h = Harness::new(builtins());
    let mut definition = graph(json!({ "start": {} }));
    definition.active = false;
    let workflow_id = h.deploy(definition);

    let err = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowInactive(_)));

    let err = h.runner.start_workflow(Uuid::new_v4(), Payload::new(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    assert_eq!(h.store.execution_count(), 0);
}

// ============================================================
// Lifecycle
// ============================================================

#[tokio::test]
async fn at_most_one_step_is_in_flight_per_execution() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({
        "start": { "next": "a" },
        "a": { "next": "b" },
        "b": {},
    })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    assert_eq!(h.queue.pending_len(), 1);
    assert_eq!(h.record(execution_id).await.status, ExecutionStatus::Pending);

    for done in ["start", "a"] {
        assert_eq!(h.worker.run_until_idle(1).await, 1);
        assert_eq!(h.queue.pending_len(), 1);
        let record = h.record(execution_id).await;
        assert_eq!(record.status, ExecutionStatus::InProgress);
        assert_eq!(record.current_node_id.as_deref(), Some(done));
    }

    assert_eq!(h.worker.run_until_idle(1).await, 1);
    assert!(h.queue.is_idle());
    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.current_node_id.as_deref(), Some("b"));
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({
        "start": { "next": "n1" },
        "n1": { "type": "set", "parameters": { "values": { "stage": "welcomed" } } },
    })));

    let execution_id = h
        .runner
        .start_workflow(workflow_id, Payload::new(), Some("signup-form".into()))
        .await
        .unwrap();
    h.drain().await;

    assert_eq!(
        h.events.names(),
        vec![
            "workflow_started",
            "workflow_node_processed",
            "workflow_node_processed",
            "workflow_completed",
        ]
    );
    let events = h.events.events.lock().clone();
    assert!(events.iter().all(|e| e.execution_id() == execution_id));
    assert_eq!(
        events[2],
        WorkflowEvent::WorkflowNodeProcessed {
            execution_id,
            node_id: "n1".into(),
            node_type: "set".into(),
            payload: payload(json!({ "stage": "welcomed" })),
            status: NodeCompletionStatus::Completed,
        }
    );
    assert_eq!(h.record(execution_id).await.triggered_by.as_deref(), Some("signup-form"));
}

#[tokio::test]
async fn failed_run_publishes_a_single_failure() {
    let h = Harness::new(builtins().register("always-error", Arc::new(MockNode::failing("e", "nope"))));
    let workflow_id = h.deploy(graph(json!({ "start": { "type": "always-error" } })));

    h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    assert_eq!(h.events.names(), vec!["workflow_started", "workflow_failed"]);
}

#[tokio::test]
async fn redelivered_step_of_a_finished_run_is_discarded() {
    let noop = Arc::new(MockNode::returning("counted", Outcome::new()));
    let h = Harness::new(builtins().register("counted", noop.clone()));
    let definition = graph(json!({ "start": { "type": "counted" } }));
    let start = definition.start_node().unwrap().clone();
    let workflow_id = h.deploy(definition);

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;
    assert_eq!(h.record(execution_id).await.status, ExecutionStatus::Completed);

    let replay = StepDescriptor { execution_id, node: start, payload: Payload::new() };
    let disposition = h.runner.process_step(replay).await.unwrap();

    assert_eq!(disposition, StepDisposition::Discarded);
    assert_eq!(noop.call_count(), 1);
    assert_eq!(h.log(execution_id).await.len(), 1);
    assert_eq!(h.record(execution_id).await.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn run_follows_the_definition_it_started_with() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({
        "start": { "next": "a" },
        "a": { "next": "b" },
        "b": {},
    })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    assert_eq!(h.worker.run_until_idle(1).await, 1);

    let mut edited = graph(json!({
        "start": { "next": "a" },
        "a": { "next": "gone" },
    }));
    edited.id = workflow_id;
    h.deploy(edited);
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(
        statuses(&h.log(execution_id).await),
        vec![
            ("start", NodeCompletionStatus::Completed),
            ("a", NodeCompletionStatus::Completed),
            ("b", NodeCompletionStatus::Completed),
        ]
    );

    // New runs pick up the edit.
    let later = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;
    assert_eq!(
        h.record(later).await.error_message.as_deref(),
        Some("node 'a' routes to unknown node 'gone'")
    );
}

#[tokio::test]
async fn step_finished_elsewhere_before_it_starts_is_discarded() {
    let noop = Arc::new(MockNode::returning("counted", Outcome::new()));
    let store = Arc::new(InMemoryStore::new());
    let h = Harness::with_stores(
        builtins().register("counted", noop.clone()),
        store.clone(),
        Some(Faulty::new(store.clone(), Fault::FinishOnRead)),
        QueueConfig::default(),
    );
    let definition = graph(json!({ "start": { "type": "counted" } }));
    let start = definition.start_node().unwrap().clone();
    let workflow_id = h.deploy(definition);

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    let step = StepDescriptor { execution_id, node: start, payload: Payload::new() };
    let disposition = h.runner.process_step(step).await.unwrap();

    assert_eq!(disposition, StepDisposition::Discarded);
    assert_eq!(noop.call_count(), 0);
    assert!(h.log(execution_id).await.is_empty());
    assert_eq!(h.record(execution_id).await.status, ExecutionStatus::Completed);
    assert_eq!(h.events.names(), vec!["workflow_started"]);
}

#[tokio::test]
async fn first_step_that_cannot_be_queued_fails_the_run() {
    let store = Arc::new(InMemoryStore::new());
    let events = Arc::new(RecordingPublisher::default());
    let runner = WorkflowRunner::new(
        store.clone(),
        store.clone(),
        Arc::new(RejectingQueue),
        Arc::new(builtins().build()),
        events.clone(),
    );
    let definition = graph(json!({ "start": {} }));
    let workflow_id = definition.id;
    store.insert_workflow(definition);

    let err = runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Infrastructure);

    let records = runner.list_executions(workflow_id, None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert!(records[0].completed_at.is_some());
    assert!(records[0].error_message.as_deref().is_some_and(|m| m.contains("queue is full")));
    assert_eq!(events.names(), vec!["workflow_started", "workflow_failed"]);
}

// ============================================================
// Worker acknowledgement
// ============================================================

#[tokio::test]
async fn undecodable_jobs_are_dead_lettered() {
    let h = Harness::new(builtins());
    h.queue.enqueue(Uuid::new_v4(), json!("not a step")).await.unwrap();

    assert_eq!(h.worker.run_until_idle(10).await, 1);
    assert_eq!(h.queue.dead_letters().len(), 1);
    assert!(h.queue.is_idle());
}

#[tokio::test]
async fn steps_for_unknown_executions_are_dead_lettered() {
    let h = Harness::new(builtins());
    let step = StepDescriptor {
        execution_id: Uuid::new_v4(),
        node: NodeConfig::new("start", "noop"),
        payload: Payload::new(),
    };
    h.queue.enqueue(step.execution_id, step.to_job_payload().unwrap()).await.unwrap();

    h.drain().await;

    let dead = h.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].error.contains("not found"));
}

#[tokio::test]
async fn infrastructure_errors_are_retried_then_fail_the_run() {
    let store = Arc::new(InMemoryStore::new());
    let h = Harness::with_stores(
        builtins(),
        store.clone(),
        Some(Faulty::new(store.clone(), Fault::NoDefinitions)),
        QueueConfig::default().with_max_attempts(2),
    );
    let workflow_id = h.deploy(graph(json!({ "start": {} })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    assert_eq!(h.worker.run_until_idle(10).await, 2);

    assert_eq!(h.queue.dead_letters().len(), 1);
    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("step abandoned after 2 attempts")));
    assert_eq!(statuses(&h.log(execution_id).await), vec![("start", NodeCompletionStatus::Failed)]);
    assert_eq!(h.events.names().last(), Some(&"workflow_failed"));
}

#[tokio::test]
async fn panicking_executor_fails_the_run() {
    let h = Harness::new(builtins().register("boom", Arc::new(Panicky)));
    let workflow_id = h.deploy(graph(json!({ "start": { "type": "boom" } })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("node 'start' failed: executor panicked: plugin bug: index out of bounds")
    );
    assert_eq!(statuses(&h.log(execution_id).await), vec![("start", NodeCompletionStatus::Failed)]);
    assert!(h.queue.is_idle());
    assert_eq!(h.queue.completed_count(), 1);
}

#[tokio::test]
async fn out_of_range_delay_fails_the_run() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({
        "start": { "type": "delay", "parameters": { "seconds": 1e20 } },
    })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    h.drain().await;

    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.as_deref().is_some_and(|m| m.contains("invalid parameter 'seconds'")));
    assert!(h.queue.is_idle());
}

#[tokio::test]
async fn retried_step_leaves_one_log_entry_per_outcome() {
    let failing = Arc::new(MockNode::failing("always-error", "mailbox full"));
    let store = Arc::new(InMemoryStore::new());
    let h = Harness::with_stores(
        builtins().register("always-error", failing.clone()),
        store.clone(),
        Some(Faulty::new(store.clone(), Fault::StepWriteFailures(AtomicUsize::new(1)))),
        QueueConfig::default(),
    );
    let workflow_id = h.deploy(graph(json!({ "start": { "type": "always-error" } })));

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    assert_eq!(h.worker.run_until_idle(10).await, 2);

    // The first write was lost whole, so the redelivery starts clean.
    assert_eq!(failing.call_count(), 2);
    let record = h.record(execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(statuses(&h.log(execution_id).await), vec![("start", NodeCompletionStatus::Failed)]);
    assert_eq!(h.events.names(), vec!["workflow_started", "workflow_failed"]);
    assert!(h.queue.dead_letters().is_empty());
}

#[tokio::test]
async fn worker_loop_processes_until_shutdown() {
    let h = Harness::new(builtins());
    let workflow_id = h.deploy(graph(json!({ "start": { "next": "n1" }, "n1": {} })));
    let worker = Worker::new(
        h.runner.clone(),
        WorkerConfig::default().with_concurrency(2).with_poll_interval(Duration::from_millis(5)),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let execution_id = h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();
    let mut status = ExecutionStatus::Pending;
    for _ in 0..200 {
        status = h.record(execution_id).await.status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(status, ExecutionStatus::Completed);
}

// ============================================================
// Queries
// ============================================================

#[tokio::test]
async fn history_and_stats_cover_every_run() {
    let h = Harness::new(builtins().register("always-error", Arc::new(MockNode::failing("e", "bounced"))));
    let workflow_id = h.deploy(graph(json!({
        "start": {
            "type": "condition",
            "parameters": { "field": "ok", "operator": "equals", "value": true, "false_next": "bounce" },
        },
        "bounce": { "type": "always-error" },
    })));

    h.runner.start_workflow(workflow_id, payload(json!({ "ok": true })), None).await.unwrap();
    h.runner.start_workflow(workflow_id, payload(json!({ "ok": false })), None).await.unwrap();
    h.drain().await;
    h.runner.start_workflow(workflow_id, Payload::new(), None).await.unwrap();

    let stats = h.runner.execution_stats(workflow_id).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 1);
    assert!(stats.average_duration_ms.is_some());

    assert_eq!(h.runner.list_executions(workflow_id, Some(2)).await.unwrap().len(), 2);
    assert!(matches!(
        h.runner.list_executions(Uuid::new_v4(), None).await,
        Err(EngineError::WorkflowNotFound(_))
    ));
    assert!(matches!(
        h.runner.get_execution(Uuid::new_v4()).await,
        Err(EngineError::ExecutionNotFound(_))
    ));
}
