//! Definition lint — run this before persisting or publishing a workflow.
//!
//! Rules enforced:
//! 1. A node with the reserved id `start` exists.
//! 2. No node uses the reserved id `end`.
//! 3. Every static routing target (`next`, and a condition's `true_next` /
//!    `false_next`) is `end` or an existing node.
//!
//! Cycles are allowed: automations may loop. The engine itself only checks
//! rule 1 when a run is started; a routing problem the lint would catch
//! otherwise surfaces as a failed run.
//!
//! Returns the node ids statically reachable from `start`, in visit order.

use std::collections::{HashSet, VecDeque};

use nodes::{ExecutorRegistry, NodeConfig};

use crate::models::{WorkflowDefinition, END_NODE, START_NODE};
use crate::EngineError;

const BRANCH_PARAMETERS: [&str; 2] = ["true_next", "false_next"];

/// Routing targets declared in the node's configuration. Targets chosen at
/// run time through an outcome's `next_node` are invisible here.
pub fn static_targets(node: &NodeConfig) -> Vec<&str> {
    let mut targets: Vec<&str> = node.next.as_deref().into_iter().collect();
    if node.node_type == "condition" {
        targets.extend(
            BRANCH_PARAMETERS
                .iter()
                .filter_map(|key| node.parameter(key).and_then(|v| v.as_str())),
        );
    }
    targets
}

/// Lint `definition` and return the node ids reachable from `start`.
///
/// # Errors
/// - [`EngineError::InvalidDefinition`] if a node is named `end`.
/// - [`EngineError::MissingStartNode`] if there is no `start` node.
/// - [`EngineError::UnknownNode`] if a static target does not exist.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Reserved ids
    // -----------------------------------------------------------------------
    if definition.nodes.contains(END_NODE) {
        return Err(EngineError::InvalidDefinition(format!(
            "'{END_NODE}' is reserved and cannot be used as a node id"
        )));
    }
    if definition.start_node().is_none() {
        return Err(EngineError::MissingStartNode(definition.id));
    }

    // -----------------------------------------------------------------------
    // 2. Static targets
    // -----------------------------------------------------------------------
    for node in definition.nodes.iter() {
        for target in static_targets(node) {
            if target != END_NODE && !definition.nodes.contains(target) {
                return Err(EngineError::UnknownNode {
                    from: node.id.clone(),
                    target: target.to_owned(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Reachability (breadth-first from start)
    // -----------------------------------------------------------------------
    let mut seen: HashSet<&str> = HashSet::from([START_NODE]);
    let mut queue: VecDeque<&str> = VecDeque::from([START_NODE]);
    let mut reachable: Vec<String> = Vec::with_capacity(definition.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        reachable.push(node_id.to_owned());
        let Some(node) = definition.node(node_id) else { continue };
        for target in static_targets(node) {
            if target != END_NODE && seen.insert(target) {
                queue.push_back(target);
            }
        }
    }

    Ok(reachable)
}

/// Nodes whose type has no registered executor, as `(node id, type)`.
pub fn unknown_node_types<'a>(
    definition: &'a WorkflowDefinition,
    registry: &ExecutorRegistry,
) -> Vec<(&'a str, &'a str)> {
    definition
        .nodes
        .iter()
        .filter(|node| !registry.contains(&node.node_type))
        .map(|node| (node.id.as_str(), node.node_type.as_str()))
        .collect()
}
