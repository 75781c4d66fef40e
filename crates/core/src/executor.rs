//! Concurrent task executor
//!
//! Runs the planned closure of a task with maximal parallelism: a task is
//! spawned as soon as all of its dependencies have produced results. A
//! failure settles every transitive dependent as skipped while unrelated
//! branches keep running. Cacheable tasks go through the cache and the
//! in-flight registry, so identical work is done at most once even across
//! concurrent runs.

use crate::context::RunContext;
use crate::error::{Error, GraphError, Result, TaskFailure};
use crate::inflight::{Completed, InFlightRegistry};
use crate::params::{Args, ArgsError, resolve_args};
use crate::plan::ExecutionPlan;
use crate::report::{Resolution, RunReport, TaskSuccess};
use crate::scope::PathIndex;
use crate::task::{ResolvedInput, Task, TaskContext, TaskId};
use crate::task_cache::TaskCache;
use cask_cache::EpochToken;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executor tuning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of operations running at once (0 = unbounded)
    pub max_parallel: usize,
}

/// Schedules and runs task closures
#[derive(Clone)]
pub struct Executor {
    config: ExecutorConfig,
    inflight: InFlightRegistry,
    limiter: Option<Arc<Semaphore>>,
    labels: Arc<PathIndex>,
}

struct Outcome {
    value: Value,
    resolution: Resolution,
    duration_ms: u64,
}

type JobResult = (TaskId, std::result::Result<Outcome, TaskFailure>);

/// Everything one spawned task needs, owned so it can move onto the runtime.
struct Job {
    task: Task,
    path: String,
    namespace: Option<String>,
    dependencies: BTreeMap<String, Value>,
    args: std::result::Result<BTreeMap<String, Value>, ArgsError>,
    ctx: RunContext,
    inflight: InFlightRegistry,
    limiter: Option<Arc<Semaphore>>,
}

impl Executor {
    /// Create an executor.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        let limiter =
            (config.max_parallel > 0).then(|| Arc::new(Semaphore::new(config.max_parallel)));
        Self {
            config,
            inflight: InFlightRegistry::new(),
            limiter,
            labels: Arc::new(PathIndex::default()),
        }
    }

    /// Label tasks in logs, errors and reports with their scope paths.
    #[must_use]
    pub fn with_labels(mut self, labels: PathIndex) -> Self {
        self.labels = Arc::new(labels);
        self
    }

    /// Executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executions currently in progress.
    #[must_use]
    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.inflight
    }

    /// Plan the closure of `task` without running it.
    ///
    /// # Errors
    ///
    /// Returns an error if the closure is not a valid DAG of runnable tasks.
    pub fn plan(&self, task: &Task) -> std::result::Result<ExecutionPlan, GraphError> {
        ExecutionPlan::for_task(task, Arc::clone(&self.labels))
    }

    /// Run `task` and its dependency closure.
    ///
    /// `args` bind the parameters of `task` itself; dependencies run with
    /// their defaults. Structural problems are reported before anything
    /// executes. Task failures do not make this call fail: they are
    /// recorded in the returned [`RunReport`].
    ///
    /// # Errors
    ///
    /// Returns an error if the closure contains a cycle or an unresolved
    /// interface, or if `args` do not match the task's parameters.
    #[tracing::instrument(name = "run", skip_all, fields(task = %self.labels.label(task)))]
    pub async fn run(&self, task: &Task, args: &Args, ctx: &RunContext) -> Result<RunReport> {
        ctx.observe_environment().await;

        let plan = self.plan(task)?;
        let root_path = plan.label(plan.root());
        let root_args = resolve_args(task.params(), args).map_err(|source| {
            Error::InvalidArguments {
                path: root_path.clone(),
                source,
            }
        })?;

        info!(tasks = plan.len(), "Starting run");
        let started = Instant::now();

        let mut state = RunState::new(&plan, root_args, ctx);
        for id in state.ready() {
            self.spawn(&mut state, id);
        }

        while let Some(joined) = state.jobs.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let Some(id) = state.job_ids.get(&e.id()).copied() else {
                        continue;
                    };
                    let path = plan.label(id);
                    let failure = if e.is_cancelled() {
                        TaskFailure::Cancelled { path }
                    } else {
                        TaskFailure::Panicked {
                            path,
                            message: e.to_string(),
                        }
                    };
                    (id, Err(failure))
                }
            };

            match outcome {
                Ok(done) => {
                    for dependent in state.succeed(id, done) {
                        self.spawn(&mut state, dependent);
                    }
                }
                Err(failure) => state.fail(id, failure),
            }
        }

        let (succeeded, failed, results) = state.finish();
        info!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            duration_ms = elapsed_ms(started),
            "Run finished"
        );
        Ok(RunReport::new(
            plan.root(),
            root_path,
            succeeded,
            failed,
            results,
        ))
    }

    fn spawn(&self, state: &mut RunState<'_>, id: TaskId) {
        let plan = state.plan;
        let Some(task) = plan.task(id).cloned() else {
            return;
        };
        let dependencies = plan
            .dependencies_of(id)
            .into_iter()
            .filter_map(|(name, dep)| state.results.get(&dep).map(|value| (name, value.clone())))
            .collect();
        let args = if id == plan.root() {
            Ok(state.root_args.clone())
        } else {
            resolve_args(task.params(), &Args::default())
        };
        let job = Job {
            path: plan.label(id),
            namespace: plan.cache_namespace(id),
            task,
            dependencies,
            args,
            ctx: state.ctx.clone(),
            inflight: self.inflight.clone(),
            limiter: self.limiter.clone(),
        };
        let handle = state.jobs.spawn(async move { (id, job.execute().await) });
        state.job_ids.insert(handle.id(), id);
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// Bookkeeping of one run: what is waiting, running and settled.
struct RunState<'a> {
    plan: &'a ExecutionPlan,
    root_args: BTreeMap<String, Value>,
    ctx: &'a RunContext,
    waiting: HashMap<TaskId, usize>,
    results: HashMap<TaskId, Value>,
    successes: HashMap<TaskId, TaskSuccess>,
    failures: HashMap<TaskId, TaskFailure>,
    jobs: JoinSet<JobResult>,
    job_ids: HashMap<tokio::task::Id, TaskId>,
}

impl<'a> RunState<'a> {
    fn new(
        plan: &'a ExecutionPlan,
        root_args: BTreeMap<String, Value>,
        ctx: &'a RunContext,
    ) -> Self {
        let waiting = plan
            .order()
            .iter()
            .map(|t| {
                let distinct: HashSet<TaskId> = plan
                    .dependencies_of(t.id())
                    .into_iter()
                    .map(|(_, id)| id)
                    .collect();
                (t.id(), distinct.len())
            })
            .collect();
        Self {
            plan,
            root_args,
            ctx,
            waiting,
            results: HashMap::new(),
            successes: HashMap::new(),
            failures: HashMap::new(),
            jobs: JoinSet::new(),
            job_ids: HashMap::new(),
        }
    }

    /// Tasks with no dependencies, in plan order.
    fn ready(&self) -> Vec<TaskId> {
        self.plan
            .order()
            .iter()
            .map(Task::id)
            .filter(|id| self.waiting.get(id) == Some(&0))
            .collect()
    }

    /// Record a result and return the dependents it unblocked.
    fn succeed(&mut self, id: TaskId, done: Outcome) -> Vec<TaskId> {
        self.successes.insert(
            id,
            TaskSuccess {
                path: self.plan.label(id),
                resolution: done.resolution,
                duration_ms: done.duration_ms,
            },
        );
        self.results.insert(id, done.value);

        let mut unblocked = Vec::new();
        for dependent in self.plan.dependents_of(id) {
            if self.failures.contains_key(&dependent) {
                continue;
            }
            let Some(count) = self.waiting.get_mut(&dependent) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                unblocked.push(dependent);
            }
        }
        unblocked
    }

    /// Record a failure and settle every transitive dependent as skipped.
    fn fail(&mut self, id: TaskId, failure: TaskFailure) {
        warn!(task = failure.path(), error = %failure, "Task failed");
        let cancelled = matches!(failure, TaskFailure::Cancelled { .. });
        self.failures.insert(id, failure);
        if cancelled {
            return;
        }
        let plan = self.plan;
        let dependency = plan.label(id);
        for dependent in plan.transitive_dependents(id) {
            self.failures
                .entry(dependent)
                .or_insert_with(|| TaskFailure::DependencyFailed {
                    path: plan.label(dependent),
                    dependency: dependency.clone(),
                });
        }
    }

    /// Settle leftovers as cancelled and split the outcome in plan order.
    fn finish(mut self) -> (Vec<TaskSuccess>, Vec<TaskFailure>, HashMap<TaskId, Value>) {
        // Anything never settled was held back by cancellation
        for task in self.plan.order() {
            let id = task.id();
            if !self.successes.contains_key(&id) && !self.failures.contains_key(&id) {
                self.failures.insert(
                    id,
                    TaskFailure::Cancelled {
                        path: self.plan.label(id),
                    },
                );
            }
        }

        let mut succeeded = Vec::with_capacity(self.successes.len());
        let mut failed = Vec::with_capacity(self.failures.len());
        for task in self.plan.order() {
            if let Some(success) = self.successes.remove(&task.id()) {
                succeeded.push(success);
            } else if let Some(failure) = self.failures.remove(&task.id()) {
                failed.push(failure);
            }
        }
        (succeeded, failed, self.results)
    }
}

impl Job {
    async fn execute(self) -> std::result::Result<Outcome, TaskFailure> {
        let started = Instant::now();
        let Self {
            task,
            path,
            namespace,
            dependencies,
            args,
            ctx,
            inflight,
            limiter,
        } = self;

        let args = args.map_err(|e| TaskFailure::InvalidArguments {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let input = ResolvedInput { args, dependencies };
        let epoch = ctx.epoch().token();
        let cancel = ctx.cancellation().clone();

        let key = namespace
            .as_deref()
            .and_then(|namespace| TaskCache::key_for(&task, namespace, &input, &epoch));
        let Some(key) = key else {
            let value = run_operation(&task, &path, input, epoch, &cancel, limiter).await?;
            return Ok(Outcome {
                value,
                resolution: Resolution::Executed,
                duration_ms: elapsed_ms(started),
            });
        };

        // The shared work observes its own token, cancelled only once every
        // run waiting on it has gone.
        let ticket = {
            let cache = ctx.cache().clone();
            let task = task.clone();
            let key_owned = key.clone();
            let label = path.clone();
            inflight.join_or_start(&key, &path, move |work_cancel| {
                async move {
                    if let Some(value) = cache.lookup(&task, &key_owned).await {
                        return Ok(Completed {
                            value,
                            from_cache: true,
                        });
                    }
                    let value =
                        run_operation(&task, &label, input, epoch, &work_cancel, limiter).await?;
                    cache.store(&task, &key_owned, &value).await;
                    Ok(Completed {
                        value,
                        from_cache: false,
                    })
                }
                .boxed()
            })
        };

        let completed = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TaskFailure::Cancelled { path }),
            outcome = ticket.outcome() => outcome?,
        };
        let resolution = match (ticket.is_leader(), completed.from_cache) {
            (false, _) => Resolution::Joined,
            (true, true) => Resolution::Cached,
            (true, false) => Resolution::Executed,
        };
        debug!(task = %path, ?resolution, "Task resolved");
        Ok(Outcome {
            value: completed.value,
            resolution,
            duration_ms: elapsed_ms(started),
        })
    }
}

async fn run_operation(
    task: &Task,
    path: &str,
    input: ResolvedInput,
    epoch: EpochToken,
    cancel: &CancellationToken,
    limiter: Option<Arc<Semaphore>>,
) -> std::result::Result<Value, TaskFailure> {
    let cancelled = || TaskFailure::Cancelled {
        path: path.to_string(),
    };
    let Some(operation) = task.operation() else {
        return Err(TaskFailure::Operation {
            path: path.to_string(),
            message: "task has no operation".to_string(),
        });
    };

    let _permit = match limiter {
        Some(limiter) => tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled()),
            permit = limiter.acquire_owned() => Some(permit.map_err(|_| cancelled())?),
        },
        None => None,
    };
    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    debug!(task = %path, "Executing task");
    let started = Instant::now();
    let ctx = TaskContext::new(path.to_string(), input, epoch, cancel.child_token());
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(cancelled()),
        result = operation(ctx) => result,
    };

    match result {
        Ok(value) => {
            info!(task = %path, duration_ms = elapsed_ms(started), "Task completed");
            Ok(value)
        }
        Err(e) => Err(TaskFailure::Operation {
            path: path.to_string(),
            message: e.to_string(),
        }),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::params::{Param, ParamKind};
    use crate::task::CacheConfig;
    use cask_cache::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting(description: &str, calls: &Arc<AtomicUsize>, value: Value) -> Task {
        let calls = Arc::clone(calls);
        Task::builder(description)
            .run(move |_| {
                let calls = Arc::clone(&calls);
                let value = value.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(value)
                }
            })
            .build()
            .unwrap()
    }

    fn failing(description: &str) -> Task {
        Task::builder(description)
            .run(|_| async { Err(TaskError::new("boom")) })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_results_flow_to_dependents() {
        let one = Task::builder("one")
            .run_typed(|_| async { Ok(1_i64) })
            .build()
            .unwrap();
        let two = Task::builder("two")
            .run_typed(|_| async { Ok(2_i64) })
            .build()
            .unwrap();
        let sum = Task::builder("sum")
            .dependency("lhs", &one)
            .dependency("rhs", &two)
            .run_typed(|ctx| async move {
                Ok(ctx.dep::<i64>("lhs")? + ctx.dep::<i64>("rhs")?)
            })
            .build()
            .unwrap();

        let report = Executor::default()
            .run(&sum, &Args::new(), &RunContext::new())
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded().len(), 3);
        assert_eq!(report.output::<i64>().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shared_dependency_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = counting("a", &calls, json!(1));
        let b = Task::builder("b")
            .dependency("a", &a)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();
        let c = Task::builder("c")
            .dependency("a", &a)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();
        let d = Task::builder("d")
            .dependency("b", &b)
            .dependency("c", &c)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();

        let report = Executor::default()
            .run(&d, &Args::new(), &RunContext::new())
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = failing("a");
        let b = Task::builder("b")
            .dependency("a", &a)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();
        let c = counting("c", &calls, json!("ok"));
        let root = Task::builder("root")
            .dependency("b", &b)
            .dependency("c", &c)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();

        let report = Executor::default()
            .run(&root, &Args::new(), &RunContext::new())
            .await
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(report.success("c").is_some());
        assert!(matches!(
            report.failure("a"),
            Some(TaskFailure::Operation { .. })
        ));
        assert_eq!(
            report.failure("b"),
            Some(&TaskFailure::DependencyFailed {
                path: "b".into(),
                dependency: "a".into()
            })
        );
        assert!(report.failure("root").unwrap().is_propagated());
        assert_eq!(report.into_result().unwrap_err().path(), "a");
    }

    #[tokio::test]
    async fn test_cycle_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = counting("a", &calls, json!(1));
        let b = Task::builder("b")
            .dependency("a", &a)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();
        // Same identity as `a`, now depending on its own dependent
        let a_again = a
            .to_builder()
            .allow_undeclared()
            .provide("b", &b)
            .build()
            .unwrap();

        let err = Executor::default()
            .run(&a_again, &Args::new(), &RunContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::Structure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_root_arguments_are_validated() {
        let task = Task::builder("greet")
            .param(Param::positional("name", ParamKind::String))
            .run(|ctx| async move {
                let name: String = ctx.arg("name")?.unwrap_or_default();
                Ok(json!(format!("hello {name}")))
            })
            .build()
            .unwrap();
        let executor = Executor::default();
        let ctx = RunContext::new();

        let err = executor.run(&task, &Args::new(), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArguments { .. }));

        let report = executor
            .run(&task, &Args::new().arg("ledger"), &ctx)
            .await
            .unwrap();
        assert_eq!(report.root_result(), Some(&json!("hello ledger")));
    }

    #[tokio::test]
    async fn test_dependency_with_required_param_fails() {
        let needs_arg = Task::builder("needs")
            .param(Param::named("value", ParamKind::Number))
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();
        let root = Task::builder("root")
            .dependency("needs", &needs_arg)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();
        let report = Executor::default()
            .run(&root, &Args::new(), &RunContext::new())
            .await
            .unwrap();
        assert!(matches!(
            report.failure("needs"),
            Some(TaskFailure::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_cached_task_skips_second_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = counting("cached", &calls, json!({"n": 1}))
            .to_builder()
            .cached(CacheConfig::by_input())
            .build()
            .unwrap();
        let ctx = RunContext::new().with_store(Arc::new(MemoryStore::new()));
        let executor = Executor::default();

        let first = executor.run(&task, &Args::new(), &ctx).await.unwrap();
        let second = executor.run(&task, &Args::new(), &ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.succeeded()[0].resolution, Resolution::Executed);
        assert_eq!(second.succeeded()[0].resolution, Resolution::Cached);
        assert_eq!(second.root_result(), Some(&json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut builder = Task::builder("root").run(|_| async { Ok(json!(null)) });
        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let leaf = Task::builder(format!("leaf{i}"))
                .run(move |_| {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!(i))
                    }
                })
                .build()
                .unwrap();
            builder = builder.dependency(format!("leaf{i}"), leaf);
        }
        let root = builder.build().unwrap();

        let executor = Executor::new(ExecutorConfig { max_parallel: 2 });
        let report = executor
            .run(&root, &Args::new(), &RunContext::new())
            .await
            .unwrap();
        assert!(report.is_success());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    fn slow_cached(calls: &Arc<AtomicUsize>) -> Task {
        let calls = Arc::clone(calls);
        Task::builder("slow")
            .cached(CacheConfig::by_input())
            .run(move |ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::select! {
                        () = ctx.cancellation().cancelled() => Err(TaskError::new("stopped")),
                        () = tokio::time::sleep(Duration::from_millis(100)) => Ok(json!("done")),
                    }
                }
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_cached_tasks_sharing_a_description_keep_their_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = counting("build", &calls, json!(1))
            .to_builder()
            .cached(CacheConfig::by_input())
            .build()
            .unwrap();
        let second = counting("build", &calls, json!(2))
            .to_builder()
            .cached(CacheConfig::by_input())
            .build()
            .unwrap();
        let root = Task::builder("root")
            .dependency("first", &first)
            .dependency("second", &second)
            .run_typed(|ctx| async move {
                Ok(vec![ctx.dep::<i64>("first")?, ctx.dep::<i64>("second")?])
            })
            .build()
            .unwrap();

        let ctx = RunContext::new().with_store(Arc::new(MemoryStore::new()));
        let report = Executor::default()
            .run(&root, &Args::new(), &ctx)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.output::<Vec<i64>>().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_identical_requests_coalesce_without_a_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = slow_cached(&calls);
        let executor = Executor::default();
        let ctx = RunContext::new();
        assert!(!ctx.cache().is_enabled());

        let args = Args::new();
        let (a, b) = tokio::join!(
            executor.run(&slow, &args, &ctx),
            executor.run(&slow, &args, &ctx),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.is_success() && b.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let resolutions = [a.succeeded()[0].resolution, b.succeeded()[0].resolution];
        assert!(resolutions.contains(&Resolution::Joined));

        // Nothing was stored, so a later run executes again
        executor.run(&slow, &Args::new(), &ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelling_one_run_leaves_a_joined_run_intact() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = slow_cached(&calls);
        let executor = Executor::default();
        let store: Arc<dyn cask_cache::CacheStore> = Arc::new(MemoryStore::new());
        let cancelled = RunContext::new().with_store(Arc::clone(&store));
        let kept = RunContext::new().with_store(store);

        let canceller = cancelled.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let args = Args::new();
        let (a, b) = tokio::join!(
            executor.run(&slow, &args, &cancelled),
            executor.run(&slow, &args, &kept),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(matches!(
            a.failure("slow"),
            Some(TaskFailure::Cancelled { .. })
        ));
        assert!(b.is_success(), "{:?}", b.failed());
        assert_eq!(b.root_result(), Some(&json!("done")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_running_tasks() {
        let slow = Task::builder("slow")
            .run(|ctx| async move {
                ctx.cancellation().cancelled().await;
                Err(TaskError::new("stopped"))
            })
            .build()
            .unwrap();
        let after = Task::builder("after")
            .dependency("slow", &slow)
            .run(|_| async { Ok(json!(null)) })
            .build()
            .unwrap();

        let ctx = RunContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let report = Executor::default()
            .run(&after, &Args::new(), &ctx)
            .await
            .unwrap();
        assert!(matches!(
            report.failure("slow"),
            Some(TaskFailure::Cancelled { .. })
        ));
        assert!(matches!(
            report.failure("after"),
            Some(TaskFailure::Cancelled { .. })
        ));
    }
}
