//! Dependency references
//!
//! A dependency may be named as a task, as a scope (meaning its default
//! child) or as a composite exporting one of its inner tasks. All forms
//! normalize to a plain [`Task`] at construction time.

use crate::error::GraphError;
use crate::scope::Scope;
use crate::task::Task;

/// A scope published under an explicit exported task
#[derive(Debug, Clone)]
pub struct Composite {
    scope: Scope,
    export: String,
}

impl Composite {
    /// Expose task `export` of `scope`.
    ///
    /// `export` may be a `:`-separated path into nested scopes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownExport`] if the path does not resolve.
    pub fn new(scope: Scope, export: impl Into<String>) -> Result<Self, GraphError> {
        let export = export.into();
        if scope.resolve(&export).is_none() {
            return Err(GraphError::UnknownExport {
                composite: scope.name().to_string(),
                export,
            });
        }
        Ok(Self { scope, export })
    }

    /// Wrapped scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Path of the exported task within the scope.
    #[must_use]
    pub fn export(&self) -> &str {
        &self.export
    }
}

/// Anything that can be named as a dependency
#[derive(Debug, Clone)]
pub enum DependencyRef {
    /// A task
    Task(Task),
    /// A scope, standing for its default child
    Scope(Scope),
    /// A composite, standing for its exported task
    Composite(Composite),
}

impl DependencyRef {
    /// Resolve to the task this reference denotes.
    ///
    /// Normalizing is idempotent and preserves identity: the returned task
    /// shares its id with the task stored in the reference.
    ///
    /// # Errors
    ///
    /// Returns an error if a scope has no default child or a composite's
    /// export no longer resolves.
    pub fn normalize(&self) -> Result<Task, GraphError> {
        match self {
            Self::Task(task) => Ok(task.clone()),
            Self::Scope(scope) => scope.default_task(),
            Self::Composite(composite) => {
                composite
                    .scope
                    .resolve(&composite.export)
                    .ok_or_else(|| GraphError::UnknownExport {
                        composite: composite.scope.name().to_string(),
                        export: composite.export.clone(),
                    })
            }
        }
    }
}

impl From<Task> for DependencyRef {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<&Task> for DependencyRef {
    fn from(task: &Task) -> Self {
        Self::Task(task.clone())
    }
}

impl From<Scope> for DependencyRef {
    fn from(scope: Scope) -> Self {
        Self::Scope(scope)
    }
}

impl From<&Scope> for DependencyRef {
    fn from(scope: &Scope) -> Self {
        Self::Scope(scope.clone())
    }
}

impl From<Composite> for DependencyRef {
    fn from(composite: Composite) -> Self {
        Self::Composite(composite)
    }
}
