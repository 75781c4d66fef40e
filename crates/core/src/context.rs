//! Per-run execution context
//!
//! Everything an execution needs from its surroundings travels in a
//! [`RunContext`]: the cache, the environment epoch, the cancellation token
//! and an optional probe that detects environment restarts.

use crate::error::TaskError;
use crate::task_cache::TaskCache;
use async_trait::async_trait;
use cask_cache::{CacheStore, EnvironmentEpoch};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Reports the identity of the environment tasks act upon.
///
/// A change of identity between runs means the environment was restarted
/// or replaced, which advances the epoch and invalidates every
/// environment-sensitive cached result.
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    /// Current environment instance id, if the environment is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be queried.
    async fn instance_id(&self) -> Result<Option<String>, TaskError>;
}

/// Handles shared by every task of a run
#[derive(Clone, Default)]
pub struct RunContext {
    cache: TaskCache,
    epoch: EnvironmentEpoch,
    cancel: CancellationToken,
    probe: Option<Arc<dyn EnvironmentProbe>>,
}

impl RunContext {
    /// Context with caching disabled and a fresh epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `cache` for task results.
    #[must_use]
    pub fn with_cache(mut self, cache: TaskCache) -> Self {
        self.cache = cache;
        self
    }

    /// Cache task results in `store`.
    #[must_use]
    pub fn with_store(self, store: Arc<dyn CacheStore>) -> Self {
        self.with_cache(TaskCache::new(store))
    }

    /// Share an existing epoch.
    #[must_use]
    pub fn with_epoch(mut self, epoch: EnvironmentEpoch) -> Self {
        self.epoch = epoch;
        self
    }

    /// Use `cancel` to stop the run.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check `probe` for environment restarts at the start of each run.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Task result cache.
    #[must_use]
    pub fn cache(&self) -> &TaskCache {
        &self.cache
    }

    /// Environment epoch.
    #[must_use]
    pub fn epoch(&self) -> &EnvironmentEpoch {
        &self.epoch
    }

    /// Cancellation token of the run.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal every running task to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Query the probe and advance the epoch if the environment restarted.
    ///
    /// Returns whether the epoch advanced. Probe failures are logged and
    /// leave the epoch unchanged.
    pub async fn observe_environment(&self) -> bool {
        let Some(probe) = &self.probe else {
            return false;
        };
        match probe.instance_id().await {
            Ok(Some(instance)) => {
                let restarted = self.epoch.observe_instance(&instance);
                if restarted {
                    info!(%instance, generation = self.epoch.generation(), "Environment restarted");
                }
                restarted
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Environment probe failed");
                false
            }
        }
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("cache", &self.cache)
            .field("epoch", &self.epoch)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("probe", &self.probe.is_some())
            .finish()
    }
}
