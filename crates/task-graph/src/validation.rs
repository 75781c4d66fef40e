//! Validation utilities for task graphs.
//!
//! This module provides types and functions for validating task graph structure.

use crate::{Error, TaskGraph, TaskNodeData};

/// Result of graph validation.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the graph is valid (no cycles, no dangling edges).
    pub is_valid: bool,
    /// List of validation errors, if any.
    pub errors: Vec<Error>,
}

impl ValidationResult {
    /// Create a valid result.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
        }
    }

    /// Create an invalid result with errors.
    #[must_use]
    pub fn invalid(errors: Vec<Error>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Validate the graph structure.
    ///
    /// Checks for:
    /// - Cycles in the dependency graph
    /// - Declared dependencies whose task never made it into the graph
    ///
    /// Graphs produced by [`TaskGraph::build_for_task`] already reject both,
    /// so this is mainly useful for graphs assembled with [`TaskGraph::add_task`].
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        if self.has_cycles() {
            errors.push(Error::CycleDetected {
                path: vec!["Task dependency graph contains cycles".to_string()],
            });
        }

        for (_, node) in self.iter_nodes() {
            for (_, dep) in node.task.dependencies() {
                if !self.contains_task(dep.node_id()) {
                    errors.push(Error::MissingDependency {
                        task: node.label.clone(),
                        dependency: dep.label(),
                    });
                }
            }
        }

        if errors.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct TestTask {
        id: u8,
        deps: Vec<TestTask>,
    }

    impl TaskNodeData for TestTask {
        type Id = u8;

        fn node_id(&self) -> u8 {
            self.id
        }

        fn label(&self) -> String {
            format!("t{}", self.id)
        }

        fn dependencies(&self) -> Vec<(String, Self)> {
            self.deps.iter().map(|d| (d.label(), d.clone())).collect()
        }
    }

    #[test]
    fn test_validate_empty_graph() {
        let graph: TaskGraph<TestTask> = TaskGraph::new();
        let result = graph.validate();
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_validate_built_graph() {
        let a = TestTask { id: 1, deps: vec![] };
        let b = TestTask {
            id: 2,
            deps: vec![a],
        };
        let graph = TaskGraph::build_for_task(&b).unwrap();
        assert!(graph.validate().is_valid);
    }

    #[test]
    fn test_validate_dangling_dependency() {
        let a = TestTask { id: 1, deps: vec![] };
        let b = TestTask {
            id: 2,
            deps: vec![a],
        };
        let mut graph = TaskGraph::new();
        graph.add_task(&b).unwrap();

        let result = graph.validate();
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], Error::MissingDependency { .. }));
    }
}
