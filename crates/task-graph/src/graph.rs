//! Task graph builder using petgraph.
//!
//! This module flattens a requested task and its transitive dependencies
//! into a directed acyclic graph (DAG) and derives execution order from it.

use crate::{Error, Result, TaskNodeData};
use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeRef, IntoNodeReferences};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// A node in the task graph.
#[derive(Debug, Clone)]
pub struct GraphNode<T: TaskNodeData> {
    /// Identity of the task.
    pub id: T::Id,
    /// Label of the task, used for reporting.
    pub label: String,
    /// The task data.
    pub task: T,
}

/// Task graph for dependency resolution and execution ordering.
///
/// Edges point from a dependency to its dependent and carry the local name
/// under which the dependent refers to it.
pub struct TaskGraph<T: TaskNodeData> {
    /// The directed graph of tasks.
    graph: DiGraph<GraphNode<T>, String>,
    /// Map from task ids to node indices.
    id_to_node: HashMap<T::Id, NodeIndex>,
    /// The requested task, when built through [`TaskGraph::build_for_task`].
    root: Option<NodeIndex>,
}

struct Frame<T> {
    index: NodeIndex,
    deps: std::vec::IntoIter<(String, T)>,
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Create a new empty task graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            id_to_node: HashMap::new(),
            root: None,
        }
    }

    /// Build the graph for a requested task and all of its transitive dependencies.
    ///
    /// Collection is an iterative depth-first walk keyed by task id. A task
    /// reached again while it is still on the walk path is a cycle, reported
    /// with the full path through it before anything is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] if the task can reach itself and
    /// [`Error::IdCollision`] if two distinct tasks share an id.
    pub fn build_for_task(root: &T) -> Result<Self> {
        let mut graph = Self::new();
        let (root_index, _) = graph.add_task(root)?;
        graph.root = Some(root_index);

        debug!("Building graph for '{}'", root.label());

        let mut path: Vec<(T::Id, String)> = vec![(root.node_id(), root.label())];
        let mut stack = vec![Frame {
            index: root_index,
            deps: root.dependencies().into_iter(),
        }];

        while let Some(frame) = stack.last_mut() {
            let Some((name, dep)) = frame.deps.next() else {
                stack.pop();
                path.pop();
                continue;
            };
            let parent = frame.index;
            let dep_id = dep.node_id();

            if let Some(position) = path.iter().position(|(id, _)| *id == dep_id) {
                let mut cycle: Vec<String> =
                    path[position..].iter().map(|(_, label)| label.clone()).collect();
                cycle.push(dep.label());
                return Err(Error::CycleDetected { path: cycle });
            }

            let (dep_index, is_new) = graph.add_task(&dep)?;
            graph.graph.add_edge(dep_index, parent, name);

            if is_new {
                path.push((dep_id, dep.label()));
                stack.push(Frame {
                    index: dep_index,
                    deps: dep.dependencies().into_iter(),
                });
            }
        }

        debug!(tasks = graph.task_count(), "Task graph built");
        Ok(graph)
    }

    /// Add a single task to the graph without wiring its edges.
    ///
    /// If a task with the same id already exists, returns the existing node
    /// index and `false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdCollision`] if the existing task with that id has a
    /// different set of dependencies.
    pub fn add_task(&mut self, task: &T) -> Result<(NodeIndex, bool)> {
        let id = task.node_id();
        if let Some(&node) = self.id_to_node.get(&id) {
            let existing = &self.graph[node];
            if dependency_ids(&existing.task) != dependency_ids(task) {
                return Err(Error::IdCollision {
                    id: id.to_string(),
                    first: existing.label.clone(),
                    second: task.label(),
                });
            }
            return Ok((node, false));
        }

        let label = task.label();
        let node_index = self.graph.add_node(GraphNode {
            id,
            label: label.clone(),
            task: task.clone(),
        });
        self.id_to_node.insert(id, node_index);
        debug!("Added task node '{}'", label);

        Ok((node_index, true))
    }

    /// The requested task this graph was built for.
    #[must_use]
    pub fn root(&self) -> Option<&GraphNode<T>> {
        self.root.and_then(|idx| self.graph.node_weight(idx))
    }

    /// Get a reference to a task node by id.
    #[must_use]
    pub fn get(&self, id: T::Id) -> Option<&GraphNode<T>> {
        self.id_to_node
            .get(&id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Check if the graph has cycles.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Get topologically sorted list of tasks.
    ///
    /// Ties between unrelated tasks have no defined order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn topological_sort(&self) -> Result<Vec<GraphNode<T>>> {
        match toposort(&self.graph, None) {
            Ok(sorted_indices) => Ok(sorted_indices
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(cycle) => Err(Error::CycleDetected {
                path: vec![self.graph[cycle.node_id()].label.clone()],
            }),
        }
    }

    /// Get all tasks that can run in parallel, grouped by dependency level.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn get_parallel_groups(&self) -> Result<Vec<Vec<GraphNode<T>>>> {
        let sorted = toposort(&self.graph, None).map_err(|_| Error::TopologicalSortFailed {
            reason: "petgraph toposort failed".to_string(),
        })?;

        let mut groups: Vec<Vec<GraphNode<T>>> = vec![];
        let mut levels: HashMap<NodeIndex, usize> = HashMap::new();

        for idx in sorted {
            // One level below the deepest dependency
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| levels.get(&dep))
                .map(|dep_level| dep_level + 1)
                .max()
                .unwrap_or(0);

            if level >= groups.len() {
                groups.resize_with(level + 1, Vec::new);
            }
            groups[level].push(self.graph[idx].clone());
            levels.insert(idx, level);
        }

        Ok(groups)
    }

    /// Direct dependencies of a task as `(local name, dependency id)` pairs.
    #[must_use]
    pub fn dependencies_of(&self, id: T::Id) -> Vec<(String, T::Id)> {
        let Some(&idx) = self.id_to_node.get(&id) else {
            return vec![];
        };
        let mut deps: Vec<(String, T::Id)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| (edge.weight().clone(), self.graph[edge.source()].id))
            .collect();
        deps.sort();
        deps
    }

    /// Distinct tasks that directly depend on the given task.
    #[must_use]
    pub fn dependents_of(&self, id: T::Id) -> Vec<T::Id> {
        let Some(&idx) = self.id_to_node.get(&id) else {
            return vec![];
        };
        let unique: BTreeSet<T::Id> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id)
            .collect();
        unique.into_iter().collect()
    }

    /// Every task that depends on the given task, directly or transitively.
    #[must_use]
    pub fn transitive_dependents(&self, id: T::Id) -> HashSet<T::Id> {
        let mut seen = HashSet::new();
        let mut frontier: VecDeque<T::Id> = VecDeque::from([id]);
        while let Some(current) = frontier.pop_front() {
            for dependent in self.dependents_of(current) {
                if seen.insert(dependent) {
                    frontier.push_back(dependent);
                }
            }
        }
        seen
    }

    /// Get the number of tasks in the graph.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a task exists in the graph.
    #[must_use]
    pub fn contains_task(&self, id: T::Id) -> bool {
        self.id_to_node.contains_key(&id)
    }

    /// Iterate over all nodes in the graph.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode<T>)> {
        self.graph.node_references()
    }
}

impl<T: TaskNodeData> Default for TaskGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn dependency_ids<T: TaskNodeData>(task: &T) -> BTreeSet<(String, T::Id)> {
    task.dependencies()
        .into_iter()
        .map(|(name, dep)| (name, dep.node_id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simple test task implementation
    #[derive(Clone, Debug)]
    struct TestTask {
        id: u32,
        name: &'static str,
        deps: Vec<(String, TestTask)>,
    }

    impl TestTask {
        fn new(id: u32, name: &'static str, deps: &[&TestTask]) -> Self {
            Self {
                id,
                name,
                deps: deps
                    .iter()
                    .map(|d| (d.name.to_string(), (*d).clone()))
                    .collect(),
            }
        }
    }

    impl TaskNodeData for TestTask {
        type Id = u32;

        fn node_id(&self) -> u32 {
            self.id
        }

        fn label(&self) -> String {
            self.name.to_string()
        }

        fn dependencies(&self) -> Vec<(String, Self)> {
            self.deps.clone()
        }
    }

    fn positions(sorted: &[GraphNode<TestTask>]) -> HashMap<String, usize> {
        sorted
            .iter()
            .enumerate()
            .map(|(i, node)| (node.label.clone(), i))
            .collect()
    }

    #[test]
    fn test_task_graph_new() {
        let graph: TaskGraph<TestTask> = TaskGraph::new();
        assert_eq!(graph.task_count(), 0);
        assert!(graph.root().is_none());
    }

    #[test]
    fn test_single_task() {
        let task = TestTask::new(1, "solo", &[]);
        let graph = TaskGraph::build_for_task(&task).unwrap();
        assert_eq!(graph.task_count(), 1);
        assert_eq!(graph.root().unwrap().id, 1);
        assert!(graph.contains_task(1));
    }

    #[test]
    fn test_task_dependencies() {
        let task1 = TestTask::new(1, "task1", &[]);
        let task2 = TestTask::new(2, "task2", &[&task1]);
        let task3 = TestTask::new(3, "task3", &[&task1, &task2]);

        let graph = TaskGraph::build_for_task(&task3).unwrap();
        assert_eq!(graph.task_count(), 3);
        assert!(!graph.has_cycles());

        let sorted = graph.topological_sort().unwrap();
        let positions = positions(&sorted);
        assert!(positions["task1"] < positions["task2"]);
        assert!(positions["task1"] < positions["task3"]);
        assert!(positions["task2"] < positions["task3"]);
    }

    #[test]
    fn test_cycle_detection_reports_path() {
        // task1 is rebuilt with the same id on top of something that needs it
        let task1 = TestTask::new(1, "task1", &[]);
        let task2 = TestTask::new(2, "task2", &[&task1]);
        let task3 = TestTask::new(3, "task3", &[&task2]);
        let task1_again = TestTask::new(1, "task1", &[&task3]);

        let err = TaskGraph::build_for_task(&task1_again).err().unwrap();
        assert_eq!(
            err,
            Error::CycleDetected {
                path: vec![
                    "task1".to_string(),
                    "task3".to_string(),
                    "task2".to_string(),
                    "task1".to_string(),
                ]
            }
        );
    }

    #[test]
    fn test_self_dependency_cycle() {
        let task = TestTask::new(7, "loop", &[]);
        let looped = TestTask::new(7, "loop", &[&task]);

        let err = TaskGraph::build_for_task(&looped).err().unwrap();
        assert!(matches!(err, Error::CycleDetected { ref path } if path.len() == 2));
    }

    #[test]
    fn test_id_collision() {
        let a = TestTask::new(1, "a", &[]);
        let b = TestTask::new(2, "b", &[]);
        let impostor = TestTask::new(1, "impostor", &[&b]);
        let root = TestTask::new(3, "root", &[&a, &impostor]);

        let err = TaskGraph::build_for_task(&root).err().unwrap();
        assert!(matches!(err, Error::IdCollision { .. }));
    }

    #[test]
    fn test_parallel_groups() {
        // Level 0: task1, task2
        // Level 1: task3 (task1), task4 (task2)
        // Level 2: task5 (task3, task4)
        let task1 = TestTask::new(1, "task1", &[]);
        let task2 = TestTask::new(2, "task2", &[]);
        let task3 = TestTask::new(3, "task3", &[&task1]);
        let task4 = TestTask::new(4, "task4", &[&task2]);
        let task5 = TestTask::new(5, "task5", &[&task3, &task4]);

        let graph = TaskGraph::build_for_task(&task5).unwrap();
        let groups = graph.get_parallel_groups().unwrap();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[2].len(), 1);
        assert_eq!(groups[2][0].label, "task5");
    }

    #[test]
    fn test_diamond_dependency() {
        let base = TestTask::new(1, "base", &[]);
        let left = TestTask::new(2, "left", &[&base]);
        let right = TestTask::new(3, "right", &[&base]);
        let top = TestTask::new(4, "top", &[&left, &right]);

        let graph = TaskGraph::build_for_task(&top).unwrap();
        assert_eq!(graph.task_count(), 4);

        let sorted = graph.topological_sort().unwrap();
        let positions = positions(&sorted);
        assert_eq!(positions["base"], 0);
        assert_eq!(positions["top"], 3);
    }

    #[test]
    fn test_dependency_names_and_dependents() {
        let base = TestTask::new(1, "base", &[]);
        let left = TestTask::new(2, "left", &[&base]);
        let right = TestTask::new(3, "right", &[&base]);
        let top = TestTask::new(4, "top", &[&left, &right]);

        let graph = TaskGraph::build_for_task(&top).unwrap();
        assert_eq!(
            graph.dependencies_of(4),
            vec![("left".to_string(), 2), ("right".to_string(), 3)]
        );
        assert_eq!(graph.dependents_of(1), vec![2, 3]);

        let transitive = graph.transitive_dependents(1);
        assert_eq!(transitive, HashSet::from([2, 3, 4]));
        assert!(graph.transitive_dependents(4).is_empty());
    }

    #[test]
    fn test_shared_dependency_deduplication() {
        let shared = TestTask::new(1, "shared", &[]);
        let a = TestTask::new(2, "a", &[&shared]);
        let b = TestTask::new(3, "b", &[&shared]);
        let c = TestTask::new(4, "c", &[&shared, &a, &b]);

        let graph = TaskGraph::build_for_task(&c).unwrap();
        assert_eq!(graph.task_count(), 4);
        assert_eq!(graph.dependents_of(1), vec![2, 3, 4]);
    }
}
