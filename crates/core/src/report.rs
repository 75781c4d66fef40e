//! Run reports

use crate::error::TaskFailure;
use crate::task::TaskId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// How a successful task obtained its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// The operation ran
    Executed,
    /// The result was read from the cache
    Cached,
    /// The result was shared by a concurrent execution of the same key
    Joined,
}

/// A task that produced a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSuccess {
    /// Task path
    pub path: String,
    /// How the result was obtained
    pub resolution: Resolution,
    /// Wall time spent on the task, in milliseconds
    pub duration_ms: u64,
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    root: TaskId,
    root_path: String,
    succeeded: Vec<TaskSuccess>,
    failed: Vec<TaskFailure>,
    results: HashMap<TaskId, Value>,
}

impl RunReport {
    pub(crate) fn new(
        root: TaskId,
        root_path: String,
        succeeded: Vec<TaskSuccess>,
        failed: Vec<TaskFailure>,
        results: HashMap<TaskId, Value>,
    ) -> Self {
        Self {
            root,
            root_path,
            succeeded,
            failed,
            results,
        }
    }

    /// Whether the requested task and all of its dependencies succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.results.contains_key(&self.root)
    }

    /// Path of the requested task.
    #[must_use]
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Successful tasks in dependency order.
    #[must_use]
    pub fn succeeded(&self) -> &[TaskSuccess] {
        &self.succeeded
    }

    /// Failed tasks in dependency order.
    #[must_use]
    pub fn failed(&self) -> &[TaskFailure] {
        &self.failed
    }

    /// Failure recorded for `path`.
    #[must_use]
    pub fn failure(&self, path: &str) -> Option<&TaskFailure> {
        self.failed.iter().find(|f| f.path() == path)
    }

    /// Success record for `path`.
    #[must_use]
    pub fn success(&self, path: &str) -> Option<&TaskSuccess> {
        self.succeeded.iter().find(|s| s.path == path)
    }

    /// Number of tasks whose operation actually ran.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.succeeded
            .iter()
            .filter(|s| s.resolution == Resolution::Executed)
            .count()
    }

    /// Result of task `id`.
    #[must_use]
    pub fn result(&self, id: TaskId) -> Option<&Value> {
        self.results.get(&id)
    }

    /// Result of the requested task.
    #[must_use]
    pub fn root_result(&self) -> Option<&Value> {
        self.results.get(&self.root)
    }

    /// Root result, or the failure that caused it to be missing.
    ///
    /// When the root was skipped because of a dependency, the failure of the
    /// task that originally failed is returned instead.
    ///
    /// # Errors
    ///
    /// Returns the root-cause failure of an unsuccessful run.
    pub fn into_result(mut self) -> Result<Value, TaskFailure> {
        if let Some(value) = self.results.remove(&self.root) {
            return Ok(value);
        }
        let cause = self
            .failed
            .iter()
            .position(|f| !f.is_propagated())
            .or_else(|| (!self.failed.is_empty()).then_some(0));
        match cause {
            Some(index) => Err(self.failed.swap_remove(index)),
            None => Err(TaskFailure::Cancelled {
                path: self.root_path,
            }),
        }
    }

    /// Decode the root result as `T`.
    ///
    /// # Errors
    ///
    /// Returns the root-cause failure, or an encoding failure if the result
    /// does not decode as `T`.
    pub fn output<T: DeserializeOwned>(self) -> Result<T, TaskFailure> {
        let path = self.root_path.clone();
        let value = self.into_result()?;
        serde_json::from_value(value).map_err(|e| TaskFailure::Encoding {
            path,
            message: e.to_string(),
        })
    }
}
