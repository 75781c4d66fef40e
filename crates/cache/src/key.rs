//! Deterministic cache key computation

use crate::epoch::EpochToken;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Everything a persisted task result is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeyEnvelope {
    /// Namespace separating tasks whose own keys could coincide
    pub namespace: String,
    /// Key the task derived from its resolved input
    pub task_key: String,
    /// Environment epoch, present only for environment-sensitive tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<EpochToken>,
    /// cask version
    pub cask_version: String,
}

impl CacheKeyEnvelope {
    /// Create an envelope for the current cask version.
    #[must_use]
    pub fn new(namespace: impl Into<String>, task_key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            task_key: task_key.into(),
            epoch: None,
            cask_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Bind the envelope to an environment epoch.
    #[must_use]
    pub fn with_epoch(mut self, epoch: EpochToken) -> Self {
        self.epoch = Some(epoch);
        self
    }
}

/// Compute a deterministic cache key from the envelope
///
/// # Errors
///
/// Returns an error if the envelope cannot be serialized.
pub fn compute_cache_key(envelope: &CacheKeyEnvelope) -> Result<String> {
    let json = serde_json::to_value(envelope)
        .map_err(|e| Error::serialization(format!("Failed to encode envelope: {e}")))?;
    let bytes = serde_json::to_vec(&json)
        .map_err(|e| Error::serialization(format!("Failed to serialize envelope: {e}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_stable_when_nothing_changes() {
        let envelope = CacheKeyEnvelope::new("build", "n=1");
        let key1 = compute_cache_key(&envelope).unwrap();
        let key2 = compute_cache_key(&envelope).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 64);
    }

    #[test]
    fn cache_key_changes_with_task_key() {
        let a = compute_cache_key(&CacheKeyEnvelope::new("build", "n=1")).unwrap();
        let b = compute_cache_key(&CacheKeyEnvelope::new("build", "n=2")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_changes_with_namespace() {
        let a = compute_cache_key(&CacheKeyEnvelope::new("build", "x")).unwrap();
        let b = compute_cache_key(&CacheKeyEnvelope::new("install", "x")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_changes_with_epoch() {
        let base = CacheKeyEnvelope::new("install", "x");
        let first = base.clone().with_epoch(EpochToken {
            generation: 0,
            instance: None,
        });
        let second = base.with_epoch(EpochToken {
            generation: 1,
            instance: None,
        });
        assert_ne!(
            compute_cache_key(&first).unwrap(),
            compute_cache_key(&second).unwrap()
        );
    }
}
