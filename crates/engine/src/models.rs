//! Core domain models for the workflow engine.
//!
//! A [`WorkflowDefinition`] is the immutable graph a run walks; an
//! [`ExecutionRecord`] plus its [`NodeCompletionRecord`] log is everything
//! the engine persists about one run.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use nodes::{NodeConfig, Payload};

/// Reserved id of the node every run starts at.
pub const START_NODE: &str = "start";
/// Reserved routing target that finishes a run. Never looked up in the graph.
pub const END_NODE: &str = "end";

// ---------------------------------------------------------------------------
// NodeGraph
// ---------------------------------------------------------------------------

/// Nodes keyed by id.
///
/// Deserialises from a JSON object whose keys are node ids. A node may omit
/// its `id` (the key is used); an `id` that disagrees with its key is
/// rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, NodeConfig>",
    into = "BTreeMap<String, NodeConfig>"
)]
pub struct NodeGraph(BTreeMap<String, NodeConfig>);

impl NodeGraph {
    pub fn get(&self, id: &str) -> Option<&NodeConfig> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeConfig> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<BTreeMap<String, NodeConfig>> for NodeGraph {
    type Error = String;

    fn try_from(mut nodes: BTreeMap<String, NodeConfig>) -> Result<Self, Self::Error> {
        for (key, node) in nodes.iter_mut() {
            if node.id.is_empty() {
                node.id = key.clone();
            } else if node.id != *key {
                return Err(format!("node keyed '{key}' declares id '{}'", node.id));
            }
        }
        Ok(Self(nodes))
    }
}

impl From<NodeGraph> for BTreeMap<String, NodeConfig> {
    fn from(graph: NodeGraph) -> Self {
        graph.0
    }
}

impl FromIterator<NodeConfig> for NodeGraph {
    fn from_iter<I: IntoIterator<Item = NodeConfig>>(iter: I) -> Self {
        Self(iter.into_iter().map(|n| (n.id.clone(), n)).collect())
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

fn default_active() -> bool {
    true
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    /// Inactive workflows cannot be started.
    #[serde(default = "default_active")]
    pub active: bool,
    pub nodes: NodeGraph,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: impl IntoIterator<Item = NodeConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            active: true,
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.get(id)
    }

    pub fn start_node(&self) -> Option<&NodeConfig> {
        self.nodes.get(START_NODE)
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// Lifecycle of one run: `pending → in_progress → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"     => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed"   => Ok(Self::Completed),
            "failed"      => Ok(Self::Failed),
            other         => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One triggered run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub current_node_id: Option<String>,
    /// Snapshot of the payload after the last completed node.
    pub payload: Payload,
    pub triggered_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    /// Wall-clock duration of a finished run.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }
}

// ---------------------------------------------------------------------------
// NodeCompletionRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCompletionStatus {
    Completed,
    Failed,
    Skipped,
}

impl NodeCompletionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeCompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeCompletionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "skipped"   => Ok(Self::Skipped),
            other       => Err(format!("unknown node completion status: {other}")),
        }
    }
}

/// Append-only audit entry, one per node visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCompletionRecord {
    pub execution_id: Uuid,
    pub node_id: String,
    pub status: NodeCompletionStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A record together with its node log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    #[serde(flatten)]
    pub record: ExecutionRecord,
    pub nodes: Vec<NodeCompletionRecord>,
}

// ---------------------------------------------------------------------------
// StepDescriptor
// ---------------------------------------------------------------------------

/// Everything a worker needs to process one node of one execution. This is
/// the task-queue job payload.
///
/// The payload travels by value: each step owns its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub execution_id: Uuid,
    pub node: NodeConfig,
    pub payload: Payload,
}

impl StepDescriptor {
    pub fn to_job_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_job_payload(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

// ---------------------------------------------------------------------------
// ExecutionStats
// ---------------------------------------------------------------------------

/// Per-workflow run counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub workflow_id: Uuid,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    /// Mean duration of finished runs, in milliseconds.
    pub average_duration_ms: Option<i64>,
}

impl ExecutionStats {
    pub fn from_records(workflow_id: Uuid, records: &[ExecutionRecord]) -> Self {
        let mut stats = Self {
            workflow_id,
            total: records.len(),
            ..Self::default()
        };

        let mut finished_ms: Vec<i64> = Vec::new();
        for record in records {
            match record.status {
                ExecutionStatus::Pending => stats.pending += 1,
                ExecutionStatus::InProgress => stats.in_progress += 1,
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Failed => stats.failed += 1,
            }
            if let Some(duration) = record.duration() {
                finished_ms.push(duration.num_milliseconds());
            }
        }

        if !finished_ms.is_empty() {
            let count = i64::try_from(finished_ms.len()).unwrap_or(i64::MAX);
            stats.average_duration_ms = Some(finished_ms.iter().sum::<i64>() / count);
        }
        stats
    }
}
