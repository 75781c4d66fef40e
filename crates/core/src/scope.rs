//! Hierarchical task namespaces
//!
//! A [`Scope`] groups named tasks and nested scopes. Tasks are addressed by
//! `:`-separated paths such as `ledger:install`; naming a scope stands for
//! its default child.

use crate::error::GraphError;
use crate::task::{Task, TaskId};
use std::collections::{BTreeMap, HashMap};

const PATH_SEPARATOR: char = ':';

/// A child of a scope
#[derive(Debug, Clone)]
pub enum ScopeEntry {
    /// A task
    Task(Task),
    /// A nested scope
    Scope(Scope),
}

/// A named group of tasks and nested scopes
#[derive(Debug, Clone)]
pub struct Scope {
    name: String,
    description: String,
    children: BTreeMap<String, ScopeEntry>,
    default_child: Option<String>,
}

fn validate_name(name: &str) -> Result<(), GraphError> {
    let reason = if name.is_empty() {
        "names must not be empty"
    } else if name.contains(PATH_SEPARATOR) {
        "names must not contain ':'"
    } else if name.chars().any(char::is_whitespace) {
        "names must not contain whitespace"
    } else {
        return Ok(());
    };
    Err(GraphError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

impl Scope {
    /// Create an empty scope.
    ///
    /// The name is validated when the scope is nested into another one.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            children: BTreeMap::new(),
            default_child: None,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add task `task` under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already taken.
    pub fn with_task(self, name: impl Into<String>, task: Task) -> Result<Self, GraphError> {
        self.insert(name.into(), ScopeEntry::Task(task))
    }

    /// Nest `scope` under its own name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already taken.
    pub fn with_scope(self, scope: Scope) -> Result<Self, GraphError> {
        let name = scope.name.clone();
        self.insert(name, ScopeEntry::Scope(scope))
    }

    fn insert(mut self, name: String, entry: ScopeEntry) -> Result<Self, GraphError> {
        validate_name(&name)?;
        if self.children.contains_key(&name) {
            return Err(GraphError::DuplicateChild {
                scope: self.name,
                name,
            });
        }
        self.children.insert(name, entry);
        Ok(self)
    }

    /// Choose the child that stands for this scope when it is referenced.
    ///
    /// # Errors
    ///
    /// Returns an error if no child has that name.
    pub fn with_default(mut self, name: impl Into<String>) -> Result<Self, GraphError> {
        let name = name.into();
        if !self.children.contains_key(&name) {
            return Err(GraphError::InvalidName {
                reason: format!("scope '{}' has no child with this name", self.name),
                name,
            });
        }
        self.default_child = Some(name);
        Ok(self)
    }

    /// Scope name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Name of the default child.
    #[must_use]
    pub fn default_child(&self) -> Option<&str> {
        self.default_child.as_deref()
    }

    /// Direct child by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScopeEntry> {
        self.children.get(name)
    }

    /// Direct children in name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ScopeEntry)> {
        self.children.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Task this scope stands for, following nested defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NoDefaultChild`] if a scope along the way has
    /// no default.
    pub fn default_task(&self) -> Result<Task, GraphError> {
        let entry = self
            .default_child
            .as_ref()
            .and_then(|name| self.children.get(name))
            .ok_or_else(|| GraphError::NoDefaultChild {
                scope: self.name.clone(),
            })?;
        match entry {
            ScopeEntry::Task(task) => Ok(task.clone()),
            ScopeEntry::Scope(scope) => scope.default_task(),
        }
    }

    /// Look up a task by `:`-separated path relative to this scope.
    ///
    /// A path ending at a scope resolves to that scope's default task. The
    /// empty path resolves to this scope's own default.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Task> {
        if path.is_empty() {
            return self.default_task().ok();
        }
        let mut scope = self;
        let mut segments = path.split(PATH_SEPARATOR).peekable();
        while let Some(segment) = segments.next() {
            match scope.children.get(segment)? {
                ScopeEntry::Task(task) => {
                    return segments.peek().is_none().then(|| task.clone());
                }
                ScopeEntry::Scope(inner) => scope = inner,
            }
        }
        scope.default_task().ok()
    }

    /// Every task reachable through this scope with its path, depth first in
    /// name order.
    #[must_use]
    pub fn walk(&self) -> Vec<(String, Task)> {
        let mut out = Vec::new();
        self.walk_into("", &mut out);
        out
    }

    fn walk_into(&self, prefix: &str, out: &mut Vec<(String, Task)>) {
        for (name, entry) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}{PATH_SEPARATOR}{name}")
            };
            match entry {
                ScopeEntry::Task(task) => out.push((path, task.clone())),
                ScopeEntry::Scope(scope) => scope.walk_into(&path, out),
            }
        }
    }

    /// Tasks carrying `tag`, with their paths.
    #[must_use]
    pub fn tasks_with_tag(&self, tag: &str) -> Vec<(String, Task)> {
        self.walk()
            .into_iter()
            .filter(|(_, task)| task.has_tag(tag))
            .collect()
    }

    /// Map from task identity to the first path it is reachable under.
    #[must_use]
    pub fn path_index(&self) -> PathIndex {
        let mut paths = HashMap::new();
        for (path, task) in self.walk() {
            paths.entry(task.id()).or_insert(path);
        }
        PathIndex { paths }
    }
}

/// Task identity to display path
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    paths: HashMap<TaskId, String>,
}

impl PathIndex {
    /// Path registered for `id`.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&str> {
        self.paths.get(&id).map(String::as_str)
    }

    /// Path of `task`, falling back to its description.
    #[must_use]
    pub fn label(&self, task: &Task) -> String {
        self.get(task.id())
            .map_or_else(|| task.description().to_string(), str::to_string)
    }

    /// Number of indexed tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
