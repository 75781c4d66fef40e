//! In-flight execution registry
//!
//! Concurrent requests for the same cache key share one execution. The
//! first caller becomes the leader and its work is spawned onto the runtime;
//! later callers join the shared outcome. The entry is dropped only after the
//! leader's work (including its cache write) has finished, so a caller
//! arriving afterwards sees the stored result instead of re-executing.
//!
//! The shared work runs under its own cancellation token, which fires only
//! once every joined caller has let go of its [`Ticket`]. Cancelling one run
//! therefore never fails the same work for another run still waiting on it.

use crate::error::TaskFailure;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a coalesced execution
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    /// Task result
    pub value: Value,
    /// Whether the result was read from the cache
    pub from_cache: bool,
}

/// Outcome shared between the leader and every joined caller
pub type SharedOutcome = Shared<BoxFuture<'static, Result<Completed, TaskFailure>>>;

/// Callers still waiting on one execution.
struct Interest {
    callers: Mutex<usize>,
    cancel: CancellationToken,
}

impl Interest {
    fn leader() -> Self {
        Self {
            callers: Mutex::new(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Register another caller, unless the work was already abandoned.
    fn join(&self) -> bool {
        let mut callers = self.callers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return false;
        }
        *callers += 1;
        true
    }

    fn leave(&self) {
        let mut callers = self.callers.lock().unwrap_or_else(PoisonError::into_inner);
        *callers = callers.saturating_sub(1);
        if *callers == 0 {
            self.cancel.cancel();
        }
    }
}

struct Entry {
    generation: u64,
    outcome: SharedOutcome,
    interest: Arc<Interest>,
}

/// A caller's hold on a shared execution.
///
/// Dropping the last ticket of an unfinished execution cancels it.
pub struct Ticket {
    outcome: SharedOutcome,
    leader: bool,
    interest: Arc<Interest>,
}

impl Ticket {
    /// Whether this caller started the execution.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.leader
    }

    /// The shared outcome.
    #[must_use]
    pub fn outcome(&self) -> SharedOutcome {
        self.outcome.clone()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.interest.leave();
    }
}

/// Registry of executions currently in progress, keyed by cache key
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    pending: Arc<Mutex<HashMap<String, Entry>>>,
    generations: Arc<AtomicU64>,
}

/// Removes the registry entry when the leader's work ends, including by panic.
struct Finish {
    registry: InFlightRegistry,
    key: String,
    generation: u64,
}

impl Drop for Finish {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.generation);
    }
}

impl InFlightRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the execution registered under `key`, or start one with `start`.
    ///
    /// `start` receives the token the shared work must observe. `path`
    /// labels failures if the work is aborted or panics. An execution whose
    /// callers have all gone is replaced rather than joined.
    pub fn join_or_start<F>(&self, key: &str, path: &str, start: F) -> Ticket
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<Completed, TaskFailure>>,
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = pending.get(key) {
            if entry.interest.join() {
                debug!(key, "Joining in-flight execution");
                return Ticket {
                    outcome: entry.outcome.clone(),
                    leader: false,
                    interest: Arc::clone(&entry.interest),
                };
            }
            debug!(key, "Replacing abandoned in-flight execution");
        }

        let interest = Arc::new(Interest::leader());
        let work = start(interest.cancel.clone());
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let guard = Finish {
            registry: self.clone(),
            key: key.to_string(),
            generation,
        };
        // The lock is held until the entry is inserted, so the guard cannot
        // remove it before it exists.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let path = path.to_string();
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(TaskFailure::Cancelled { path }),
                Err(e) => Err(TaskFailure::Panicked {
                    path,
                    message: e.to_string(),
                }),
            }
        }
        .boxed()
        .shared();

        pending.insert(
            key.to_string(),
            Entry {
                generation,
                outcome: outcome.clone(),
                interest: Arc::clone(&interest),
            },
        );
        Ticket {
            outcome,
            leader: true,
            interest,
        }
    }

    fn remove(&self, key: &str, generation: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(key).is_some_and(|e| e.generation == generation) {
            pending.remove(key);
        }
    }

    /// Whether an execution is in progress for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of executions in progress.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is in progress.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn done(value: Value) -> Result<Completed, TaskFailure> {
        Ok(Completed {
            value,
            from_cache: false,
        })
    }

    async fn until_empty(registry: &InFlightRegistry) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !registry.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_second_caller_joins_leader() {
        let registry = InFlightRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let start = |starts: Arc<AtomicUsize>, release: Arc<Notify>| {
            move |_: CancellationToken| {
                starts.fetch_add(1, Ordering::SeqCst);
                async move {
                    release.notified().await;
                    done(json!(7))
                }
                .boxed()
            }
        };

        let first = registry.join_or_start(
            "k",
            "t",
            start(Arc::clone(&starts), Arc::clone(&release)),
        );
        let second = registry.join_or_start(
            "k",
            "t",
            start(Arc::clone(&starts), Arc::clone(&release)),
        );
        assert!(first.is_leader());
        assert!(!second.is_leader());
        assert!(registry.contains("k"));

        release.notify_one();
        let (a, b) = tokio::join!(first.outcome(), second.outcome());
        assert_eq!(a.unwrap().value, json!(7));
        assert_eq!(b.unwrap().value, json!(7));
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        // Entry is dropped once the leader finishes
        until_empty(&registry).await;
    }

    #[tokio::test]
    async fn test_failure_is_shared() {
        let registry = InFlightRegistry::new();
        let ticket = registry.join_or_start("k", "unit:install", |_| {
            async {
                Err(TaskFailure::Operation {
                    path: "unit:install".into(),
                    message: "boom".into(),
                })
            }
            .boxed()
        });
        let err = ticket.outcome().await.unwrap_err();
        assert_eq!(err.path(), "unit:install");
    }

    fn explode() -> Result<Completed, TaskFailure> {
        panic!("operation exploded")
    }

    #[tokio::test]
    async fn test_panic_releases_entry() {
        let registry = InFlightRegistry::new();
        let ticket = registry.join_or_start("k", "t", |_| async { explode() }.boxed());
        assert!(matches!(
            ticket.outcome().await,
            Err(TaskFailure::Panicked { .. })
        ));
        until_empty(&registry).await;
    }

    type Start = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<Completed, TaskFailure>>>;

    fn until_cancelled(release: Arc<Notify>) -> Start {
        Box::new(move |cancel| {
            async move {
                tokio::select! {
                    () = cancel.cancelled() => Err(TaskFailure::Cancelled { path: "t".into() }),
                    () = release.notified() => done(json!("finished")),
                }
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_leader_leaving_keeps_work_for_followers() {
        let registry = InFlightRegistry::new();
        let release = Arc::new(Notify::new());

        let leader = registry.join_or_start("k", "t", until_cancelled(Arc::clone(&release)));
        let follower = registry.join_or_start("k", "t", until_cancelled(Arc::clone(&release)));
        drop(leader);
        tokio::task::yield_now().await;

        release.notify_one();
        assert_eq!(follower.outcome().await.unwrap().value, json!("finished"));
    }

    #[tokio::test]
    async fn test_last_caller_leaving_cancels_work() {
        let registry = InFlightRegistry::new();
        let release = Arc::new(Notify::new());

        let only = registry.join_or_start("k", "t", until_cancelled(Arc::clone(&release)));
        let outcome = only.outcome();
        drop(only);
        assert!(matches!(outcome.await, Err(TaskFailure::Cancelled { .. })));
        until_empty(&registry).await;

        // A later caller starts fresh instead of joining the abandoned work
        let fresh = registry.join_or_start("k", "t", |_| async { done(json!(1)) }.boxed());
        assert!(fresh.is_leader());
        assert_eq!(fresh.outcome().await.unwrap().value, json!(1));
    }
}
