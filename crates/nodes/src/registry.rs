//! Executor registry — maps node `type` strings to executors.
//!
//! Registration happens once through a [`RegistryBuilder`]; the built
//! [`ExecutorRegistry`] only exposes lookups, so nothing can be added or
//! swapped after the process has started serving steps.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{NodeExecutor, UnknownNodeType};

/// Read-only lookup from node type to executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Resolve the executor bound to `node_type`.
    ///
    /// # Errors
    /// [`UnknownNodeType`] when nothing is registered for the type.
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeExecutor>, UnknownNodeType> {
        self.executors
            .get(node_type)
            .cloned()
            .ok_or_else(|| UnknownNodeType(node_type.to_owned()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Registered node types, sorted.
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

/// Collects executors before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl RegistryBuilder {
    /// Bind `executor` to `node_type`. A later registration for the same
    /// type replaces the earlier one.
    pub fn register(mut self, node_type: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        let node_type = node_type.into();
        if self.executors.insert(node_type.clone(), executor).is_some() {
            warn!(node_type = %node_type, "replacing previously registered executor");
        } else {
            debug!(node_type = %node_type, "registered executor");
        }
        self
    }

    /// Register every built-in control-flow node type.
    pub fn with_builtins(self) -> Self {
        crate::builtin::register(self)
    }

    pub fn build(self) -> ExecutorRegistry {
        ExecutorRegistry {
            executors: self.executors,
        }
    }
}
