//! Execution planning
//!
//! Flattens a requested task and its provided dependencies into a
//! [`TaskGraph`] keyed by task identity, rejecting cycles and unresolved
//! interfaces before anything runs.

use crate::error::GraphError;
use crate::scope::PathIndex;
use crate::task::{Task, TaskId};
use crate::task_cache::TaskCache;
use cask_task_graph::{TaskGraph, TaskNodeData};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Graph node: a task plus the index used to label it.
#[derive(Clone)]
pub struct PlanNode {
    task: Task,
    labels: Arc<PathIndex>,
}

impl PlanNode {
    /// The planned task.
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }
}

impl TaskNodeData for PlanNode {
    type Id = TaskId;

    fn node_id(&self) -> TaskId {
        self.task.id()
    }

    fn label(&self) -> String {
        self.labels.label(&self.task)
    }

    fn dependencies(&self) -> Vec<(String, Self)> {
        self.task
            .provided()
            .iter()
            .map(|(name, task)| {
                (
                    name.clone(),
                    Self {
                        task: task.clone(),
                        labels: Arc::clone(&self.labels),
                    },
                )
            })
            .collect()
    }
}

/// The flattened, validated dependency closure of one requested task
pub struct ExecutionPlan {
    graph: TaskGraph<PlanNode>,
    order: Vec<Task>,
    root: TaskId,
    labels: Arc<PathIndex>,
}

impl ExecutionPlan {
    /// Plan the execution of `task`.
    ///
    /// # Errors
    ///
    /// Returns an error if the closure contains a cycle, two distinct tasks
    /// share an identity or a cache namespace, or an interface task would
    /// need to run.
    #[tracing::instrument(skip_all, fields(task = %labels.label(task)))]
    pub fn for_task(task: &Task, labels: Arc<PathIndex>) -> Result<Self, GraphError> {
        let root = PlanNode {
            task: task.clone(),
            labels: Arc::clone(&labels),
        };
        let graph = TaskGraph::build_for_task(&root)?;
        let order: Vec<Task> = graph
            .topological_sort()?
            .into_iter()
            .map(|node| node.task.task)
            .collect();

        if let Some(interface) = order.iter().find(|t| t.is_interface()) {
            return Err(GraphError::UnresolvedInterface {
                task: labels.label(interface),
            });
        }

        let mut namespaces: HashMap<String, &Task> = HashMap::new();
        for task in &order {
            let Some(namespace) = TaskCache::namespace_for(task, &labels) else {
                continue;
            };
            if let Some(first) = namespaces.insert(namespace.clone(), task) {
                return Err(GraphError::NamespaceCollision {
                    namespace,
                    first: labels.label(first),
                    second: labels.label(task),
                });
            }
        }

        tracing::debug!(tasks = order.len(), "Planned execution");
        Ok(Self {
            graph,
            order,
            root: task.id(),
            labels,
        })
    }

    /// Id of the requested task.
    #[must_use]
    pub const fn root(&self) -> TaskId {
        self.root
    }

    /// Tasks in dependency order: every task follows all of its dependencies.
    #[must_use]
    pub fn order(&self) -> &[Task] {
        &self.order
    }

    /// Layers of mutually independent tasks, in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be sorted.
    pub fn layers(&self) -> Result<Vec<Vec<Task>>, GraphError> {
        Ok(self
            .graph
            .get_parallel_groups()?
            .into_iter()
            .map(|group| group.into_iter().map(|node| node.task.task).collect())
            .collect())
    }

    /// Planned task by id.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.graph.get(id).map(|node| &node.task.task)
    }

    /// Direct dependencies of `id` as (local name, id) pairs.
    #[must_use]
    pub fn dependencies_of(&self, id: TaskId) -> Vec<(String, TaskId)> {
        self.graph.dependencies_of(id)
    }

    /// Distinct direct dependents of `id`.
    #[must_use]
    pub fn dependents_of(&self, id: TaskId) -> Vec<TaskId> {
        self.graph.dependents_of(id)
    }

    /// Every task that transitively depends on `id`.
    #[must_use]
    pub fn transitive_dependents(&self, id: TaskId) -> HashSet<TaskId> {
        self.graph.transitive_dependents(id)
    }

    /// Cache namespace of `id`, if it is a cached task.
    #[must_use]
    pub fn cache_namespace(&self, id: TaskId) -> Option<String> {
        self.task(id)
            .and_then(|task| TaskCache::namespace_for(task, &self.labels))
    }

    /// Display path of `id`.
    #[must_use]
    pub fn label(&self, id: TaskId) -> String {
        self.task(id)
            .map_or_else(|| id.to_string(), |task| self.labels.label(task))
    }

    /// Number of distinct tasks in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::CacheConfig;
    use serde_json::json;

    fn leaf(description: &str) -> Task {
        Task::builder(description)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap()
    }

    fn on(description: &str, deps: &[(&str, &Task)]) -> Task {
        deps.iter()
            .fold(Task::builder(description), |b, (name, dep)| {
                b.dependency(*name, *dep)
            })
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap()
    }

    #[test]
    fn test_diamond_shares_dependency() {
        let a = leaf("a");
        let b = on("b", &[("a", &a)]);
        let c = on("c", &[("a", &a)]);
        let d = on("d", &[("b", &b), ("c", &c)]);

        let plan = ExecutionPlan::for_task(&d, Arc::default()).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.order().first().unwrap().id(), a.id());
        assert_eq!(plan.order().last().unwrap().id(), d.id());
        assert_eq!(plan.dependents_of(a.id()).len(), 2);

        let layers = plan.layers().unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1].len(), 2);
    }

    #[test]
    fn test_cycle_by_identity_is_rejected() {
        let a = leaf("a");
        let b = on("b", &[("a", &a)]);
        // Same identity as `a`, now depending on its own dependent
        let a_again = a.to_builder().allow_undeclared().provide("b", &b).build().unwrap();
        let top = on("top", &[("a", &a_again)]);

        let err = ExecutionPlan::for_task(&top, Arc::default()).err().unwrap();
        match err {
            GraphError::Structure(cask_task_graph::Error::CycleDetected { path }) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn cached(description: &str, namespace: Option<&str>) -> Task {
        let config = match namespace {
            Some(namespace) => CacheConfig::by_input().with_namespace(namespace),
            None => CacheConfig::by_input(),
        };
        Task::builder(description)
            .cached(config)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap()
    }

    #[test]
    fn test_cached_tasks_get_distinct_namespaces() {
        let first = cached("build", None);
        let second = cached("build", None);
        let root = on("root", &[("first", &first), ("second", &second)]);

        let plan = ExecutionPlan::for_task(&root, Arc::default()).unwrap();
        assert_ne!(
            plan.cache_namespace(first.id()),
            plan.cache_namespace(second.id())
        );
        assert!(plan.cache_namespace(root.id()).is_none());
    }

    #[test]
    fn test_shared_explicit_namespace_is_rejected() {
        let first = cached("first", Some("artifacts"));
        let second = cached("second", Some("artifacts"));
        let root = on("root", &[("first", &first), ("second", &second)]);

        let err = ExecutionPlan::for_task(&root, Arc::default()).err().unwrap();
        assert!(matches!(
            err,
            GraphError::NamespaceCollision { ref namespace, .. } if namespace == "artifacts"
        ));
    }

    #[test]
    fn test_interface_cannot_be_planned() {
        let shape = Task::builder("shape").interface().build().unwrap();
        let err = ExecutionPlan::for_task(&shape, Arc::default()).err().unwrap();
        assert!(matches!(err, GraphError::UnresolvedInterface { .. }));
    }

    #[test]
    fn test_declared_but_substituted_schedules_provider() {
        let shape = Task::builder("number").interface().build().unwrap();
        let concrete = leaf("concrete");
        let task = Task::builder("user")
            .depends_on("n", &shape)
            .provide("n", &concrete)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();

        let plan = ExecutionPlan::for_task(&task, Arc::default()).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.task(concrete.id()).is_some());
        assert!(plan.task(shape.id()).is_none());
        assert_eq!(
            plan.dependencies_of(task.id()),
            vec![("n".to_string(), concrete.id())]
        );
    }
}
