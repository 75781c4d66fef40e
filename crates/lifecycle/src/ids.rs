//! Persistent resource-id map
//!
//! Records which resource each deployable unit occupies on each network.
//! The file is rewritten after every mutation, so a crash mid-run loses at
//! most the mutation in progress.

use crate::error::{Error, Result};
use crate::target::ResourceId;
use cask_core::EngineConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

type Entries = BTreeMap<String, BTreeMap<String, ResourceId>>;

/// unit → network → resource id, backed by a JSON file
#[derive(Debug)]
pub struct ResourceIdMap {
    path: PathBuf,
    entries: Mutex<Entries>,
    flush: tokio::sync::Mutex<()>,
}

impl ResourceIdMap {
    /// Load the map at `path`. A missing file yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::serialization(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            flush: tokio::sync::Mutex::new(()),
        })
    }

    /// Load the map at the configured `ids_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        Self::load(&config.ids_file).await
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resource recorded for `unit` on `network`.
    #[must_use]
    pub fn get(&self, unit: &str, network: &str) -> Option<ResourceId> {
        self.lock()
            .get(unit)
            .and_then(|networks| networks.get(network))
            .cloned()
    }

    /// Record `id` for `unit` on `network` and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn set(&self, unit: &str, network: &str, id: ResourceId) -> Result<()> {
        let _flush = self.flush.lock().await;
        {
            let mut entries = self.lock();
            let networks = entries.entry(unit.to_string()).or_default();
            if networks.get(network) == Some(&id) {
                return Ok(());
            }
            networks.insert(network.to_string(), id);
        }
        self.write().await
    }

    /// Forget `unit` on `network` and flush. Returns the removed id.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn remove(&self, unit: &str, network: &str) -> Result<Option<ResourceId>> {
        let _flush = self.flush.lock().await;
        let removed = {
            let mut entries = self.lock();
            let removed = entries
                .get_mut(unit)
                .and_then(|networks| networks.remove(network));
            if entries.get(unit).is_some_and(BTreeMap::is_empty) {
                entries.remove(unit);
            }
            removed
        };
        if removed.is_some() {
            self.write().await?;
        }
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write(&self) -> Result<()> {
        let bytes = {
            let entries = self.lock();
            serde_json::to_vec_pretty(&*entries)
                .map_err(|e| Error::serialization(e.to_string()))?
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent, "create directory"))?;
        }

        let tmp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::io(e, &tmp, "write"))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::io(e, &self.path, "rename"))?;
        debug!(path = %self.path.display(), "Flushed resource ids");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let ids = ResourceIdMap::load(tmp.path().join("ids.json")).await.unwrap();
        assert!(ids.get("ledger", "local").is_none());
    }

    #[tokio::test]
    async fn test_every_mutation_is_persisted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".cask").join("ids.json");

        let ids = ResourceIdMap::load(&path).await.unwrap();
        ids.set("ledger", "local", ResourceId::new("res-0001")).await.unwrap();
        ids.set("ledger", "ic", ResourceId::new("ryjl3")).await.unwrap();

        let reloaded = ResourceIdMap::load(&path).await.unwrap();
        assert_eq!(reloaded.get("ledger", "local"), Some(ResourceId::new("res-0001")));
        assert_eq!(reloaded.get("ledger", "ic"), Some(ResourceId::new("ryjl3")));

        let removed = reloaded.remove("ledger", "local").await.unwrap();
        assert_eq!(removed, Some(ResourceId::new("res-0001")));

        let again = ResourceIdMap::load(&path).await.unwrap();
        assert!(again.get("ledger", "local").is_none());
        assert_eq!(again.get("ledger", "ic"), Some(ResourceId::new("ryjl3")));
    }

    #[tokio::test]
    async fn test_concurrent_sets_all_land() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ids.json");
        let ids = std::sync::Arc::new(ResourceIdMap::load(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let ids = std::sync::Arc::clone(&ids);
            handles.push(tokio::spawn(async move {
                ids.set(&format!("unit-{i}"), "local", ResourceId::new(format!("res-{i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reloaded = ResourceIdMap::load(&path).await.unwrap();
        for i in 0..8 {
            assert_eq!(
                reloaded.get(&format!("unit-{i}"), "local"),
                Some(ResourceId::new(format!("res-{i}")))
            );
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ids.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            ResourceIdMap::load(&path).await,
            Err(Error::Serialization { .. })
        ));
    }
}
