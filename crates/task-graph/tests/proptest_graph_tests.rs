//! Property-based tests for task graph invariants.
//!
//! These tests verify the behavioral contracts of the task graph:
//! - Topological sort respects all dependencies
//! - Parallel groups contain only independent tasks
//! - Cycle detection reports a path through the cycle

use cask_task_graph::{Error, TaskGraph, TaskNodeData};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

// =============================================================================
// Test Task Type
// =============================================================================

/// Simple task type for property testing.
#[derive(Clone, Debug)]
struct PropTask {
    id: usize,
    deps: Arc<Vec<PropTask>>,
}

impl TaskNodeData for PropTask {
    type Id = usize;

    fn node_id(&self) -> usize {
        self.id
    }

    fn label(&self) -> String {
        format!("task_{}", self.id)
    }

    fn dependencies(&self) -> Vec<(String, Self)> {
        self.deps.iter().map(|d| (d.label(), d.clone())).collect()
    }
}

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate dependency lists for a DAG.
///
/// Task `i` may only depend on tasks with lower indices, so no cycles exist.
fn dag_strategy(min_tasks: usize, max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (min_tasks..=max_tasks).prop_flat_map(|task_count| {
        let dep_strategies: Vec<_> = (0..task_count)
            .map(|i| {
                if i == 0 {
                    Just(vec![]).boxed()
                } else {
                    proptest::collection::btree_set(0..i, 0..=i.min(3))
                        .prop_map(|deps| deps.into_iter().collect())
                        .boxed()
                }
            })
            .collect();
        dep_strategies
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Materialize tasks in index order and add a root depending on all of them.
fn build_tasks(deps: &[Vec<usize>]) -> (Vec<PropTask>, PropTask) {
    let mut tasks: Vec<PropTask> = Vec::with_capacity(deps.len());
    for (i, task_deps) in deps.iter().enumerate() {
        let resolved = task_deps.iter().map(|&d| tasks[d].clone()).collect();
        tasks.push(PropTask {
            id: i,
            deps: Arc::new(resolved),
        });
    }
    let root = PropTask {
        id: deps.len(),
        deps: Arc::new(tasks.clone()),
    };
    (tasks, root)
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    /// Contract: every dependency index precedes every dependent index.
    #[test]
    fn topological_sort_respects_dependencies(deps in dag_strategy(1, 15)) {
        let (_, root) = build_tasks(&deps);
        let graph = TaskGraph::build_for_task(&root).expect("DAG should build");
        prop_assert!(!graph.has_cycles());

        let sorted = graph.topological_sort().expect("Sort should succeed for DAG");
        let positions: HashMap<usize, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id, i))
            .collect();

        for (task, task_deps) in deps.iter().enumerate() {
            for dep in task_deps {
                prop_assert!(
                    positions[dep] < positions[&task],
                    "task_{} must come before task_{}", dep, task
                );
            }
        }
        prop_assert_eq!(positions[&root.id], sorted.len() - 1);
    }

    /// Contract: the flattened graph holds the root plus its whole closure, once each.
    #[test]
    fn closure_includes_every_task_once(deps in dag_strategy(1, 20)) {
        let (_, root) = build_tasks(&deps);
        let graph = TaskGraph::build_for_task(&root).expect("DAG should build");
        prop_assert_eq!(graph.task_count(), deps.len() + 1);

        let ids: BTreeSet<usize> = graph.iter_nodes().map(|(_, n)| n.id).collect();
        prop_assert_eq!(ids.len(), deps.len() + 1);
    }

    /// Contract: tasks in one parallel group never depend on each other.
    #[test]
    fn parallel_groups_are_independent(deps in dag_strategy(1, 15)) {
        let (_, root) = build_tasks(&deps);
        let graph = TaskGraph::build_for_task(&root).expect("DAG should build");
        let groups = graph.get_parallel_groups().expect("Groups should compute");

        let level: HashMap<usize, usize> = groups
            .iter()
            .enumerate()
            .flat_map(|(lvl, group)| group.iter().map(move |n| (n.id, lvl)))
            .collect();

        for (task, task_deps) in deps.iter().enumerate() {
            for dep in task_deps {
                prop_assert!(level[dep] < level[&task]);
            }
        }
    }

    /// Contract: a chain whose head is rebuilt on top of its tail is a cycle,
    /// and the error names a path that starts and ends at the same task.
    #[test]
    fn cycle_detection_reports_path(len in 1_usize..8) {
        let chain: Vec<Vec<usize>> = (0..len)
            .map(|i| if i == 0 { vec![] } else { vec![i - 1] })
            .collect();
        let (tasks, _) = build_tasks(&chain);
        let head_again = PropTask {
            id: 0,
            deps: Arc::new(vec![tasks[len - 1].clone()]),
        };

        match TaskGraph::build_for_task(&head_again) {
            Err(Error::CycleDetected { path }) => {
                prop_assert_eq!(path.len(), len + 1);
                prop_assert_eq!(path.first(), path.last());
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
            Ok(_) => prop_assert!(false, "cycle was not detected"),
        }
    }
}
