//! Task result caching
//!
//! Wraps a [`CacheStore`] with the task-level policy: which tasks are
//! cacheable, how their key envelope is assembled and what happens when the
//! store misbehaves. Store errors never fail a task; they are logged and the
//! lookup is treated as a miss.

use crate::scope::PathIndex;
use crate::task::{ResolvedInput, Task};
use cask_cache::{CacheKeyEnvelope, CacheStore, EpochToken, compute_cache_key};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache layer consulted by the executor
#[derive(Clone, Default)]
pub struct TaskCache {
    store: Option<Arc<dyn CacheStore>>,
}

impl TaskCache {
    /// Cache backed by `store`.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Cache that never stores anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Whether a store is attached.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Namespace the keys of `task` live under.
    ///
    /// An explicit namespace wins. Otherwise a task registered in `labels`
    /// uses its scope path, which is unique and stable across processes.
    /// An unregistered task falls back to its description qualified by its
    /// identity, so two tasks sharing a description never share entries.
    /// Returns `None` for tasks without a caching policy.
    #[must_use]
    pub fn namespace_for(task: &Task, labels: &PathIndex) -> Option<String> {
        let config = task.cache_config()?;
        let namespace = match (config.namespace(), labels.get(task.id())) {
            (Some(explicit), _) => explicit.to_string(),
            (None, Some(path)) => path.to_string(),
            (None, None) => format!("{}{}", task.description(), task.id()),
        };
        Some(namespace)
    }

    /// Full key for `task` executed against `input` under `namespace`.
    ///
    /// The key also identifies in-flight executions, so it is derived even
    /// when no store is attached. Returns `None` when the task is not
    /// cacheable or the key cannot be derived. Environment-sensitive tasks
    /// fold the epoch into the key, so an advanced epoch never hits older
    /// entries.
    #[must_use]
    pub fn key_for(
        task: &Task,
        namespace: &str,
        input: &ResolvedInput,
        epoch: &EpochToken,
    ) -> Option<String> {
        let config = task.cache_config()?;

        let task_key = match config.key(task, input) {
            Ok(key) => key,
            Err(e) => {
                warn!(task = task.description(), error = %e, "Cache key derivation failed, running uncached");
                return None;
            }
        };
        let mut envelope = CacheKeyEnvelope::new(namespace, task_key);
        if task.is_environment_sensitive() {
            envelope = envelope.with_epoch(epoch.clone());
        }

        match compute_cache_key(&envelope) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(task = task.description(), error = %e, "Cache key encoding failed, running uncached");
                None
            }
        }
    }

    /// Whether `task` has to execute for `input`: true unless a usable
    /// cached result exists.
    pub async fn should_run(
        &self,
        task: &Task,
        namespace: &str,
        input: &ResolvedInput,
        epoch: &EpochToken,
    ) -> bool {
        match Self::key_for(task, namespace, input, epoch) {
            Some(key) => self.lookup(task, &key).await.is_none(),
            None => true,
        }
    }

    /// Read and decode the cached result stored under `key`.
    pub async fn lookup(&self, task: &Task, key: &str) -> Option<Value> {
        let store = self.store.as_ref()?;
        let config = task.cache_config()?;

        let bytes = match store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(task = task.description(), "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(task = task.description(), error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match config.codec().decode(&bytes) {
            Ok(value) => {
                debug!(task = task.description(), "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(task = task.description(), error = %e, "Cached result is unreadable, treating as miss");
                None
            }
        }
    }

    /// Encode and store `value` under `key`.
    ///
    /// Returns whether the entry was written.
    pub async fn store(&self, task: &Task, key: &str, value: &Value) -> bool {
        let (Some(store), Some(config)) = (self.store.as_ref(), task.cache_config()) else {
            return false;
        };
        let bytes = match config.codec().encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(task = task.description(), error = %e, "Result could not be encoded for caching");
                return false;
            }
        };
        match store.set(key, &bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(task = task.description(), error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Drop the cached result of `task` for `input`.
    ///
    /// Returns whether an entry was removed.
    pub async fn invalidate(
        &self,
        task: &Task,
        namespace: &str,
        input: &ResolvedInput,
        epoch: &EpochToken,
    ) -> bool {
        let (Some(store), Some(key)) = (
            self.store.as_ref(),
            Self::key_for(task, namespace, input, epoch),
        ) else {
            return false;
        };
        match store.remove(&key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(task = task.description(), error = %e, "Cache removal failed");
                false
            }
        }
    }
}

impl fmt::Debug for TaskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCache")
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .finish()
    }
}
