//! Task definitions
//!
//! A [`Task`] is an immutable, cheaply cloned value describing one unit of
//! work: its operation, declared and provided dependencies, parameters,
//! caching policy and tags. Identity is carried by [`TaskId`], not by value:
//! copies derived through [`Task::to_builder`] or [`Task::provide`] keep the
//! id of the task they came from.

use crate::error::{GraphError, TaskError};
use crate::params::Param;
use crate::reference::DependencyRef;
use cask_cache::EpochToken;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{TypeId, type_name};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn fresh() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn for_tests(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Declared result type of a task.
///
/// Tasks built without [`TaskBuilder::returns`] or [`TaskBuilder::run_typed`]
/// produce [`OutputType::ANY`], which satisfies and accepts everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputType {
    name: &'static str,
    id: Option<TypeId>,
}

impl OutputType {
    /// Untyped output
    pub const ANY: Self = Self {
        name: "any",
        id: None,
    };

    /// Output of Rust type `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            name: type_name::<T>(),
            id: Some(TypeId::of::<T>()),
        }
    }

    /// Type name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a provider of this type can stand in for `expected`.
    #[must_use]
    pub fn satisfies(&self, expected: &Self) -> bool {
        match (expected.id, self.id) {
            (None, _) | (_, None) => true,
            (Some(expected), Some(found)) => expected == found,
        }
    }
}

/// Everything a task executes against: its bound arguments and the results
/// of its dependencies keyed by local dependency name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedInput {
    /// Bound parameter values
    pub args: BTreeMap<String, Value>,
    /// Dependency results
    pub dependencies: BTreeMap<String, Value>,
}

/// Boxed task operation
pub type Operation =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

/// Derives a cache key from a task and its resolved input
pub type KeyFn = Arc<dyn Fn(&Task, &ResolvedInput) -> Result<String, TaskError> + Send + Sync>;

/// Converts task results to and from cached bytes
pub trait Codec: Send + Sync {
    /// Serialize a result.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, TaskError>;

    /// Deserialize a cached result.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> Result<Value, TaskError>;
}

/// JSON codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, TaskError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, TaskError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Caching policy of a task
#[derive(Clone)]
pub struct CacheConfig {
    key: KeyFn,
    codec: Arc<dyn Codec>,
    namespace: Option<String>,
}

impl CacheConfig {
    /// Cache under a key computed by `key`.
    ///
    /// The key must cover every input that affects the result; anything it
    /// leaves out will be served stale.
    pub fn new<F>(key: F) -> Self
    where
        F: Fn(&Task, &ResolvedInput) -> Result<String, TaskError> + Send + Sync + 'static,
    {
        Self {
            key: Arc::new(key),
            codec: Arc::new(JsonCodec),
            namespace: None,
        }
    }

    /// Cache under the full resolved input (arguments and dependency results).
    #[must_use]
    pub fn by_input() -> Self {
        Self::new(|_, input| Ok(serde_json::to_string(input)?))
    }

    /// Replace the result codec.
    #[must_use]
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Set the key namespace. Defaults to the task's scope path.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Compute the task-level key.
    ///
    /// # Errors
    ///
    /// Propagates errors from the key function.
    pub fn key(&self, task: &Task, input: &ResolvedInput) -> Result<String, TaskError> {
        (self.key)(task, input)
    }

    /// Result codec.
    #[must_use]
    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Explicit namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Handle passed to a running operation
#[derive(Debug, Clone)]
pub struct TaskContext {
    path: String,
    input: ResolvedInput,
    epoch: EpochToken,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        path: String,
        input: ResolvedInput,
        epoch: EpochToken,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path,
            input,
            epoch,
            cancel,
        }
    }

    /// Path of the running task.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decode the result of dependency `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dependency is unknown or its result does not
    /// decode as `T`.
    pub fn dep<T: DeserializeOwned>(&self, name: &str) -> Result<T, TaskError> {
        let value = self
            .dep_value(name)
            .ok_or_else(|| TaskError::new(format!("dependency '{name}' is not available")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| TaskError::new(format!("dependency '{name}' has unexpected shape: {e}")))
    }

    /// Raw result of dependency `name`.
    #[must_use]
    pub fn dep_value(&self, name: &str) -> Option<&Value> {
        self.input.dependencies.get(name)
    }

    /// Decode argument `name`, if bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the bound value does not decode as `T`.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, TaskError> {
        self.input
            .args
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| TaskError::new(format!("argument '{name}': {e}")))
            })
            .transpose()
    }

    /// Resolved input of this execution.
    #[must_use]
    pub fn input(&self) -> &ResolvedInput {
        &self.input
    }

    /// Environment epoch observed when the execution started.
    #[must_use]
    pub fn epoch(&self) -> &EpochToken {
        &self.epoch
    }

    /// Fires when the run is cancelled.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

struct TaskInner {
    id: TaskId,
    description: String,
    tags: BTreeSet<String>,
    params: Vec<Param>,
    declared: BTreeMap<String, Task>,
    provided: BTreeMap<String, Task>,
    operation: Option<Operation>,
    cache: Option<CacheConfig>,
    environment_sensitive: bool,
    output: OutputType,
}

/// An immutable task definition
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Start building a task.
    pub fn builder(description: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(description)
    }

    /// Identity of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Human readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Tags attached to this task.
    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.inner.tags
    }

    /// Whether this task carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.inner.tags.contains(tag)
    }

    /// Declared parameters.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.inner.params
    }

    /// Declared dependency interfaces.
    #[must_use]
    pub fn declared(&self) -> &BTreeMap<String, Task> {
        &self.inner.declared
    }

    /// Concrete tasks scheduled as dependencies.
    #[must_use]
    pub fn provided(&self) -> &BTreeMap<String, Task> {
        &self.inner.provided
    }

    /// Whether this task only describes a shape and cannot run.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.inner.operation.is_none()
    }

    /// Declared result type.
    #[must_use]
    pub fn output_type(&self) -> OutputType {
        self.inner.output
    }

    /// Caching policy, if the task is cacheable.
    #[must_use]
    pub fn cache_config(&self) -> Option<&CacheConfig> {
        self.inner.cache.as_ref()
    }

    /// Whether the cached result depends on the state of the environment.
    #[must_use]
    pub fn is_environment_sensitive(&self) -> bool {
        self.inner.environment_sensitive
    }

    pub(crate) fn operation(&self) -> Option<&Operation> {
        self.inner.operation.as_ref()
    }

    /// Builder pre-filled from this task. The built task keeps this task's id.
    #[must_use]
    pub fn to_builder(&self) -> TaskBuilder {
        let inner = &self.inner;
        TaskBuilder {
            id: Some(inner.id),
            description: inner.description.clone(),
            tags: inner.tags.clone(),
            params: inner.params.clone(),
            declared: inner
                .declared
                .iter()
                .map(|(name, task)| (name.clone(), DependencyRef::from(task)))
                .collect(),
            provided: inner
                .provided
                .iter()
                .map(|(name, task)| (name.clone(), DependencyRef::from(task)))
                .collect(),
            allow_undeclared: inner
                .provided
                .keys()
                .any(|name| !inner.declared.contains_key(name)),
            operation: inner.operation.clone(),
            interface: inner.operation.is_none(),
            cache: inner.cache.clone(),
            environment_sensitive: inner.environment_sensitive,
            output: inner.output,
        }
    }

    /// Copy of this task with dependency `name` substituted by `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the substitution does not type-check.
    pub fn provide(
        &self,
        name: impl Into<String>,
        reference: impl Into<DependencyRef>,
    ) -> Result<Self, GraphError> {
        self.to_builder().provide(name, reference).build()
    }

    /// Whether both values denote the same task.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("description", &self.inner.description)
            .field("tags", &self.inner.tags)
            .field("provided", &self.inner.provided.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Immutable builder for [`Task`].
///
/// Every method consumes and returns the builder, so a partially configured
/// builder can be cloned and specialised in several directions.
#[derive(Clone)]
pub struct TaskBuilder {
    id: Option<TaskId>,
    description: String,
    tags: BTreeSet<String>,
    params: Vec<Param>,
    declared: Vec<(String, DependencyRef)>,
    provided: Vec<(String, DependencyRef)>,
    allow_undeclared: bool,
    operation: Option<Operation>,
    interface: bool,
    cache: Option<CacheConfig>,
    environment_sensitive: bool,
    output: OutputType,
}

impl TaskBuilder {
    fn new(description: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            tags: BTreeSet::new(),
            params: Vec::new(),
            declared: Vec::new(),
            provided: Vec::new(),
            allow_undeclared: false,
            operation: None,
            interface: false,
            cache: None,
            environment_sensitive: false,
            output: OutputType::ANY,
        }
    }

    /// Attach a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Declare a parameter.
    #[must_use]
    pub fn param(mut self, param: Param) -> Self {
        self.params.retain(|p| p.name != param.name);
        self.params.push(param);
        self
    }

    /// Declare a dependency interface under `name`.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>, reference: impl Into<DependencyRef>) -> Self {
        upsert(&mut self.declared, name.into(), reference.into());
        self
    }

    /// Substitute the concrete task scheduled for dependency `name`.
    #[must_use]
    pub fn provide(mut self, name: impl Into<String>, reference: impl Into<DependencyRef>) -> Self {
        upsert(&mut self.provided, name.into(), reference.into());
        self
    }

    /// Declare and provide dependency `name` in one step.
    #[must_use]
    pub fn dependency(self, name: impl Into<String>, reference: impl Into<DependencyRef>) -> Self {
        let name = name.into();
        let reference = reference.into();
        self.depends_on(name.clone(), reference.clone())
            .provide(name, reference)
    }

    /// Accept provisions for names that were never declared.
    #[must_use]
    pub fn allow_undeclared(mut self) -> Self {
        self.allow_undeclared = true;
        self
    }

    /// Make the task cacheable.
    #[must_use]
    pub fn cached(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Mark the cached result as tied to the current environment epoch.
    #[must_use]
    pub fn environment_sensitive(mut self) -> Self {
        self.environment_sensitive = true;
        self
    }

    /// Declare the result type without changing the operation.
    #[must_use]
    pub fn returns<T: 'static>(mut self) -> Self {
        self.output = OutputType::of::<T>();
        self
    }

    /// Build as an interface: a shape other tasks can declare, with no
    /// operation of its own.
    #[must_use]
    pub fn interface(mut self) -> Self {
        self.interface = true;
        self.operation = None;
        self
    }

    /// Set an untyped operation.
    #[must_use]
    pub fn run<F, Fut>(mut self, op: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.operation = Some(Arc::new(move |ctx| op(ctx).boxed()));
        self.interface = false;
        self
    }

    /// Set an operation producing `T`, recording `T` as the result type.
    #[must_use]
    pub fn run_typed<T, F, Fut>(mut self, op: F) -> Self
    where
        T: Serialize + 'static,
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.output = OutputType::of::<T>();
        self.operation = Some(Arc::new(move |ctx| {
            let fut = op(ctx);
            async move {
                let value = fut.await?;
                Ok(serde_json::to_value(value)?)
            }
            .boxed()
        }));
        self.interface = false;
        self
    }

    /// Validate and build the task.
    ///
    /// # Errors
    ///
    /// Returns an error if a declared dependency has no provision, a
    /// provision was never declared, a provision's result type does not
    /// match its declaration, or the task has no operation.
    pub fn build(self) -> Result<Task, GraphError> {
        let declared = normalize_all(self.declared)?;
        let provided = normalize_all(self.provided)?;

        for (name, expected) in &declared {
            match provided.get(name) {
                Some(found) if !found.output_type().satisfies(&expected.output_type()) => {
                    return Err(GraphError::IncompatibleProvision {
                        task: self.description,
                        dependency: name.clone(),
                        expected: expected.output_type().name().to_string(),
                        found: found.output_type().name().to_string(),
                    });
                }
                Some(_) => {}
                None if self.interface => {}
                None => {
                    return Err(GraphError::MissingProvision {
                        task: self.description,
                        dependency: name.clone(),
                    });
                }
            }
        }

        if !self.allow_undeclared
            && let Some(name) = provided.keys().find(|name| !declared.contains_key(*name))
        {
            return Err(GraphError::UndeclaredProvision {
                task: self.description,
                dependency: name.clone(),
            });
        }

        if self.operation.is_none() && !self.interface {
            return Err(GraphError::MissingOperation {
                task: self.description,
            });
        }

        Ok(Task {
            inner: Arc::new(TaskInner {
                id: self.id.unwrap_or_else(TaskId::fresh),
                description: self.description,
                tags: self.tags,
                params: self.params,
                declared,
                provided,
                operation: self.operation,
                cache: self.cache,
                environment_sensitive: self.environment_sensitive,
                output: self.output,
            }),
        })
    }
}

fn upsert(entries: &mut Vec<(String, DependencyRef)>, name: String, reference: DependencyRef) {
    entries.retain(|(existing, _)| *existing != name);
    entries.push((name, reference));
}

fn normalize_all(
    entries: Vec<(String, DependencyRef)>,
) -> Result<BTreeMap<String, Task>, GraphError> {
    entries
        .into_iter()
        .map(|(name, reference)| Ok((name, reference.normalize()?)))
        .collect()
}
