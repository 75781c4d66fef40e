//! Environment epochs
//!
//! An epoch is the generation of an external execution environment (for
//! example a local replica). Environment-sensitive tasks fold the current
//! [`EpochToken`] into their cache key, so an entry computed for one
//! generation is never served in another.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Snapshot of an [`EnvironmentEpoch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpochToken {
    /// Monotonic generation counter
    pub generation: u64,
    /// Identity of the environment instance last observed, if known
    pub instance: Option<String>,
}

impl fmt::Display for EpochToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}@{instance}", self.generation),
            None => write!(f, "{}", self.generation),
        }
    }
}

#[derive(Debug, Default)]
struct EpochState {
    generation: AtomicU64,
    instance: RwLock<Option<String>>,
}

/// Shared, monotonically advancing environment epoch.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentEpoch {
    state: Arc<EpochState>,
}

impl EnvironmentEpoch {
    /// Create an epoch at generation zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.generation.load(Ordering::SeqCst)
    }

    /// Snapshot of the current generation and instance.
    #[must_use]
    pub fn token(&self) -> EpochToken {
        let instance = self
            .state
            .instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        EpochToken {
            generation: self.generation(),
            instance,
        }
    }

    /// Advance to the next generation and return it.
    pub fn advance(&self) -> u64 {
        let next = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation = next, "Environment epoch advanced");
        next
    }

    /// Record the identity of the environment instance currently running.
    ///
    /// Advances the epoch when the identity differs from the one previously
    /// observed. Returns whether the epoch advanced.
    pub fn observe_instance(&self, instance: &str) -> bool {
        let mut current = self
            .state
            .instance
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == Some(instance) {
            return false;
        }
        let restarted = current.is_some();
        *current = Some(instance.to_string());
        drop(current);
        if restarted {
            self.advance();
        }
        restarted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic_and_shared() {
        let epoch = EnvironmentEpoch::new();
        let clone = epoch.clone();
        assert_eq!(epoch.generation(), 0);
        assert_eq!(clone.advance(), 1);
        assert_eq!(epoch.advance(), 2);
        assert_eq!(clone.generation(), 2);
    }

    #[test]
    fn test_observe_instance() {
        let epoch = EnvironmentEpoch::new();

        // First sighting records the instance without advancing
        assert!(!epoch.observe_instance("replica-a"));
        assert_eq!(epoch.generation(), 0);
        assert_eq!(epoch.token().instance.as_deref(), Some("replica-a"));

        assert!(!epoch.observe_instance("replica-a"));
        assert_eq!(epoch.generation(), 0);

        // A new instance means the environment restarted
        assert!(epoch.observe_instance("replica-b"));
        assert_eq!(epoch.generation(), 1);
    }

    #[test]
    fn test_token_display() {
        let token = EpochToken {
            generation: 3,
            instance: Some("abc".to_string()),
        };
        assert_eq!(token.to_string(), "3@abc");
    }
}
