//! `nodes` crate — the `NodeExecutor` trait, the executor registry and the
//! built-in control-flow node implementations.
//!
//! Every node type, built-in or plugin, implements [`NodeExecutor`] and is
//! registered with an [`ExecutorRegistry`] at start-up.
//! The engine crate dispatches execution through the registry.

pub mod builtin;
pub mod config;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use config::{NodeConfig, Outcome, Payload, NEXT_NODE_KEY};
pub use error::{NodeError, UnknownNodeType};
pub use registry::{ExecutorRegistry, RegistryBuilder};
pub use traits::{ExecutionContext, NodeExecutor};
