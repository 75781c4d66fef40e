//! Filesystem cache store
//!
//! Entries are stored one file per key in a two-level directory structure
//! named after the SHA-256 of the key, so arbitrary key strings map to safe
//! file names and no single directory grows too large.
//!
//! ```text
//! ~/.cache/cask/tasks/
//!   ab/
//!     abcdef123456... (entry bytes)
//! ```

use crate::store::CacheStore;
use crate::{Error, Result};
use async_trait::async_trait;
use dirs::{cache_dir, home_dir};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    cask_cache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) CASK_CACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/cask/tasks
    // 3) OS cache dir/cask/tasks
    // 4) ~/.cask/cache/tasks
    // 5) TMPDIR/cask/cache/tasks (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.cask_cache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("cask/tasks"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("cask/tasks"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".cask/cache/tasks"));
    }
    candidates.push(inputs.temp_dir.join("cask/cache/tasks"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // An existing directory may still be read-only (some CI images)
        if path.exists() {
            let probe = path.join(".write_probe");
            if std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
                .is_ok()
            {
                let _ = std::fs::remove_file(&probe);
                return Ok(path);
            }
            continue;
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve the default cache root directory.
///
/// # Errors
///
/// Returns an error if no candidate directory is writable.
pub fn cache_root() -> Result<PathBuf> {
    let inputs = CacheInputs {
        cask_cache_dir: std::env::var("CASK_CACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        xdg_cache_home: std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    cache_root_from_inputs(inputs)
}

/// Cache store persisting one file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store at the default cache root.
    ///
    /// # Errors
    ///
    /// Returns an error if no writable cache directory can be found.
    pub fn at_default_root() -> Result<Self> {
        cache_root().map(Self::new)
    }

    /// Root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage path for a key: `{root}/{hash[0:2]}/{hash}`
    #[must_use]
    pub fn key_to_path(&self, key: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(&hash[0..2]).join(hash)
    }
}

#[async_trait]
impl CacheStore for FsStore {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_to_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(e, &path, "read")),
        }
    }

    async fn set(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.key_to_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }

        // Write to a unique temp file, then rename into place
        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| Error::io(e, &tmp_path, "write"))?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::io(e, &path, "rename"));
        }

        debug!(path = %path.display(), size = bytes.len(), "Stored cache entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(e, &path, "remove")),
        }
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(e, &self.root, "remove_dir_all")),
        }
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::io(e, &self.root, "create_dir_all"))
    }
}
