//! Engine facade
//!
//! Binds a root [`Scope`] to an executor and a run context so tasks can be
//! run by path.

use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorConfig};
use crate::params::Args;
use crate::report::RunReport;
use crate::scope::Scope;
use crate::task::Task;
use crate::task_cache::TaskCache;

/// A task tree ready to run
pub struct Engine {
    root: Scope,
    executor: Executor,
    context: RunContext,
}

impl Engine {
    /// Engine over `root` configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured cache store cannot be opened.
    pub fn new(root: Scope, config: &EngineConfig) -> Result<Self> {
        let cache = config
            .open_store()?
            .map_or_else(TaskCache::disabled, TaskCache::new);
        let context = RunContext::new().with_cache(cache);
        Ok(Self::with_context(root, config.executor_config(), context))
    }

    /// Engine over `root` with an explicit run context.
    #[must_use]
    pub fn with_context(root: Scope, config: ExecutorConfig, context: RunContext) -> Self {
        let executor = Executor::new(config).with_labels(root.path_index());
        Self {
            root,
            executor,
            context,
        }
    }

    /// Root scope.
    #[must_use]
    pub fn root(&self) -> &Scope {
        &self.root
    }

    /// Executor.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run context shared by every run of this engine.
    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Paths of every task in the tree.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.root.walk().into_iter().map(|(path, _)| path).collect()
    }

    /// Task at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTask`] if nothing resolves at `path`.
    pub fn resolve(&self, path: &str) -> Result<Task> {
        self.root.resolve(path).ok_or_else(|| Error::UnknownTask {
            path: path.to_string(),
        })
    }

    /// Run the task at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or the run cannot be
    /// planned.
    pub async fn run_path(&self, path: &str, args: &Args) -> Result<RunReport> {
        let task = self.resolve(path)?;
        self.run(&task, args).await
    }

    /// Run `task`.
    ///
    /// # Errors
    ///
    /// Returns an error if the run cannot be planned.
    pub async fn run(&self, task: &Task, args: &Args) -> Result<RunReport> {
        self.executor.run(task, args, &self.context).await
    }

    /// Signal every running task to stop.
    pub fn cancel(&self) {
        self.context.cancel();
    }
}
