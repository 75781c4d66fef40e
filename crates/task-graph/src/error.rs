//! Error types for task graph operations.

use std::fmt;

/// Result type for task graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during task graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A dependency cycle was detected in the graph.
    CycleDetected {
        /// Labels of the tasks forming the cycle. The first and last entries
        /// name the same task.
        path: Vec<String>,
    },

    /// Two different tasks in one graph claim the same identity.
    IdCollision {
        /// The shared id.
        id: String,
        /// Label of the task first registered under the id.
        first: String,
        /// Label of the conflicting task.
        second: String,
    },

    /// A node refers to an id that is not part of the graph.
    MissingDependency {
        /// The task that has the missing dependency.
        task: String,
        /// The id of the missing dependency.
        dependency: String,
    },

    /// Failed to perform topological sort.
    TopologicalSortFailed {
        /// Reason for the failure.
        reason: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { path } => {
                write!(f, "Cycle detected in task graph: {}", path.join(" -> "))
            }
            Self::IdCollision { id, first, second } => {
                write!(
                    f,
                    "Tasks '{first}' and '{second}' share id {id} but have different dependencies"
                )
            }
            Self::MissingDependency { task, dependency } => {
                write!(f, "Task '{task}' depends on missing task '{dependency}'")
            }
            Self::TopologicalSortFailed { reason } => {
                write!(f, "Failed to sort tasks topologically: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
