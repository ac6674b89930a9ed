//! `engine` crate — domain models, definition lint, the step state machine,
//! stores, lifecycle events, the workflow runner and its queue worker.

pub mod error;
pub mod events;
pub mod graph;
pub mod machine;
pub mod models;
pub mod runner;
pub mod store;
pub mod worker;

pub use error::{EngineError, ErrorKind};
pub use events::{BroadcastEventBus, EventPublisher, WorkflowEvent};
pub use graph::{unknown_node_types, validate_definition};
pub use models::{
    ExecutionDetails, ExecutionRecord, ExecutionStats, ExecutionStatus, NodeCompletionRecord,
    NodeCompletionStatus, StepDescriptor, WorkflowDefinition, END_NODE, START_NODE,
};
pub use runner::{StepDisposition, WorkflowRunner};
pub use store::{ExecutionStateStore, InMemoryStore, PgStore, StoreError, WorkflowStore};
pub use worker::{Worker, WorkerConfig};

#[cfg(test)]
mod runner_tests;
