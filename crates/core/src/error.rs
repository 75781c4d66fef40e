//! Error types for task construction, scheduling and execution

use crate::params::ArgsError;
use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Structural problems detected while building tasks, scopes or plans.
///
/// These are raised before anything executes.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum GraphError {
    #[error("{0}")]
    #[diagnostic(
        code(cask::graph::structure),
        help("Break the dependency loop or make the task ids unique")
    )]
    Structure(#[from] cask_task_graph::Error),

    #[error("Task '{task}' declares dependency '{dependency}' but nothing provides it")]
    #[diagnostic(
        code(cask::graph::missing_provision),
        help("Provide a concrete task for '{dependency}' with `provide` or `dependency`")
    )]
    MissingProvision { task: String, dependency: String },

    #[error("Task '{task}' provides '{dependency}' which it never declared")]
    #[diagnostic(
        code(cask::graph::undeclared_provision),
        help("Declare the dependency with `depends_on` or call `allow_undeclared`")
    )]
    UndeclaredProvision { task: String, dependency: String },

    #[error(
        "Task '{task}' provides '{dependency}' returning {found}, but {expected} was declared"
    )]
    #[diagnostic(code(cask::graph::incompatible_provision))]
    IncompatibleProvision {
        task: String,
        dependency: String,
        expected: String,
        found: String,
    },

    #[error("Task '{task}' has no operation")]
    #[diagnostic(
        code(cask::graph::missing_operation),
        help("Call `run` on the builder or build it as an interface")
    )]
    MissingOperation { task: String },

    #[error("Task '{task}' is an interface and cannot be scheduled")]
    #[diagnostic(
        code(cask::graph::unresolved_interface),
        help("Substitute a concrete task for it with `provide`")
    )]
    UnresolvedInterface { task: String },

    #[error("Invalid name '{name}': {reason}")]
    #[diagnostic(code(cask::graph::invalid_name))]
    InvalidName { name: String, reason: String },

    #[error("Scope '{scope}' already has a child named '{name}'")]
    #[diagnostic(code(cask::graph::duplicate_child))]
    DuplicateChild { scope: String, name: String },

    #[error("Scope '{scope}' has no default child")]
    #[diagnostic(
        code(cask::graph::no_default_child),
        help("Reference a specific child or set one with `with_default`")
    )]
    NoDefaultChild { scope: String },

    #[error("Tasks '{first}' and '{second}' share the cache namespace '{namespace}'")]
    #[diagnostic(
        code(cask::graph::namespace_collision),
        help("Give each cached task its own namespace with `CacheConfig::with_namespace`")
    )]
    NamespaceCollision {
        namespace: String,
        first: String,
        second: String,
    },

    #[error("Composite '{composite}' does not export a task named '{export}'")]
    #[diagnostic(code(cask::graph::unknown_export))]
    UnknownExport { composite: String, export: String },
}

/// Why a single task did not produce a result.
///
/// Failures are cloned to every caller that joined the same execution,
/// so they carry rendered messages instead of source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum TaskFailure {
    #[error("Task '{path}' failed: {message}")]
    #[diagnostic(code(cask::task::operation))]
    Operation { path: String, message: String },

    #[error("Task '{path}' skipped: dependency '{dependency}' failed")]
    #[diagnostic(code(cask::task::dependency_failed))]
    DependencyFailed { path: String, dependency: String },

    #[error("Task '{path}' was cancelled")]
    #[diagnostic(code(cask::task::cancelled))]
    Cancelled { path: String },

    #[error("Task '{path}' panicked: {message}")]
    #[diagnostic(code(cask::task::panicked))]
    Panicked { path: String, message: String },

    #[error("Task '{path}' received invalid arguments: {message}")]
    #[diagnostic(code(cask::task::invalid_arguments))]
    InvalidArguments { path: String, message: String },

    #[error("Task '{path}' result could not be encoded: {message}")]
    #[diagnostic(code(cask::task::encoding))]
    Encoding { path: String, message: String },
}

impl TaskFailure {
    /// Path of the task this failure belongs to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Operation { path, .. }
            | Self::DependencyFailed { path, .. }
            | Self::Cancelled { path }
            | Self::Panicked { path, .. }
            | Self::InvalidArguments { path, .. }
            | Self::Encoding { path, .. } => path,
        }
    }

    /// Whether this failure was caused by an upstream task rather than this one.
    #[must_use]
    pub const fn is_propagated(&self) -> bool {
        matches!(self, Self::DependencyFailed { .. })
    }
}

/// Error returned by a task operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Rendered message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("serialization error: {err}"))
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("I/O error: {err}"))
    }
}

impl From<cask_cache::Error> for TaskError {
    fn from(err: cask_cache::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Top-level error for engine operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error("Invalid arguments for task '{path}': {source}")]
    #[diagnostic(code(cask::args::invalid))]
    InvalidArguments {
        path: String,
        #[source]
        source: ArgsError,
    },

    #[error("Task '{path}' not found")]
    #[diagnostic(
        code(cask::engine::unknown_task),
        help("Task paths use ':' between scope names, e.g. 'unit:install'")
    )]
    UnknownTask { path: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] cask_cache::Error),

    #[error("Configuration error: {message}")]
    #[diagnostic(code(cask::config::invalid))]
    Configuration { message: String },

    #[error("I/O error during {operation}: {}", path.display())]
    #[diagnostic(code(cask::io))]
    Io {
        #[source]
        source: std::io::Error,
        path: Box<Path>,
        operation: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an I/O error with path context
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: path.as_ref().into(),
            operation: operation.into(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_path() {
        let failure = TaskFailure::DependencyFailed {
            path: "unit:deploy".into(),
            dependency: "unit:install".into(),
        };
        assert_eq!(failure.path(), "unit:deploy");
        assert!(failure.is_propagated());
        assert_eq!(
            failure.to_string(),
            "Task 'unit:deploy' skipped: dependency 'unit:install' failed"
        );
    }

    #[test]
    fn test_graph_error_wraps_cycle() {
        let err: GraphError = cask_task_graph::Error::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        }
        .into();
        assert!(err.to_string().contains("a -> b -> a"));
        let top: Error = err.into();
        assert!(matches!(top, Error::Graph(GraphError::Structure(_))));
    }
}
