//! Task graph DAG algorithms for cask.
//!
//! This crate flattens a requested task and its transitive dependencies into
//! a directed acyclic graph (DAG) keyed by task identity, using petgraph.
//!
//! # Key Types
//!
//! - [`TaskGraph`]: The flattened graph for one requested task
//! - [`TaskNodeData`]: Trait that task types must implement to be stored in the graph
//! - [`GraphNode`]: A node in the graph containing the task id, label and data
//!
//! # Example
//!
//! ```ignore
//! use cask_task_graph::{TaskGraph, TaskNodeData};
//!
//! let graph = TaskGraph::build_for_task(&deploy)?;
//!
//! // Every dependency precedes its dependents
//! let order = graph.topological_sort()?;
//!
//! // Order-respecting layers of mutually independent tasks
//! let layers = graph.get_parallel_groups()?;
//! ```

mod error;
mod graph;
mod traversal;
mod validation;

pub use error::{Error, Result};
pub use graph::{GraphNode, TaskGraph};
pub use traversal::{ParallelGroups, TopologicalOrder};
pub use validation::ValidationResult;

use std::fmt;
use std::hash::Hash;

/// Trait for task data that can be stored in the task graph.
///
/// Nodes are identified by [`TaskNodeData::node_id`], never by value: two
/// copies of a task that share an id are the same node.
pub trait TaskNodeData: Clone {
    /// Stable node identity.
    type Id: Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display;

    /// Returns the identity of this task.
    fn node_id(&self) -> Self::Id;

    /// Human readable label used in error messages (usually the task path).
    fn label(&self) -> String;

    /// Returns the direct dependencies of this task keyed by their local name.
    fn dependencies(&self) -> Vec<(String, Self)>;
}
