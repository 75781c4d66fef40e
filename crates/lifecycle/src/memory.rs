//! In-process deployment target
//!
//! Keeps resources in memory and records every call it receives. Used by
//! tests and local dry runs.

use crate::chunk::ChunkHash;
use crate::error::{Error, Result};
use crate::target::{DeployTarget, InstallMode, ResourceId, ResourceStatus};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A call received by [`MemoryTarget`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCall {
    /// `create_resource`
    Create {
        /// Id that was requested
        requested: Option<ResourceId>,
        /// Id that was returned
        id: ResourceId,
    },
    /// `upload_whole`
    UploadWhole {
        /// Resource
        id: ResourceId,
        /// Artifact size
        size: usize,
        /// Mode the install used
        mode: InstallMode,
    },
    /// `upload_chunk`
    UploadChunk {
        /// Resource
        id: ResourceId,
        /// Chunk hash
        hash: ChunkHash,
    },
    /// `install_from_chunks`
    InstallFromChunks {
        /// Resource
        id: ResourceId,
        /// Ordered chunk hashes
        chunks: Vec<ChunkHash>,
        /// Whole-artifact hash
        whole: ChunkHash,
        /// Mode the install used
        mode: InstallMode,
    },
    /// `stop`
    Stop(ResourceId),
    /// `remove`
    Remove(ResourceId),
}

#[derive(Debug, Default)]
struct Resource {
    installed: Option<ChunkHash>,
    running: bool,
    chunks: HashMap<ChunkHash, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<ResourceId, Resource>,
    calls: Vec<TargetCall>,
    instance: Option<String>,
}

/// Deployment target held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryTarget {
    state: Mutex<State>,
    next_id: AtomicU64,
    failing_chunks: AtomicU32,
}

impl MemoryTarget {
    /// Empty target.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` chunk uploads.
    pub fn fail_chunk_uploads(&self, count: u32) {
        self.failing_chunks.store(count, Ordering::SeqCst);
    }

    /// Set the reported instance id. Changing it simulates a restart.
    pub fn set_instance(&self, instance: impl Into<String>) {
        self.lock().instance = Some(instance.into());
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<TargetCall> {
        self.lock().calls.clone()
    }

    /// Hash of the artifact installed in `id`, if any.
    #[must_use]
    pub fn installed_hash(&self, id: &ResourceId) -> Option<ChunkHash> {
        self.lock()
            .resources
            .get(id)
            .and_then(|resource| resource.installed)
    }

    /// Whether `id` exists.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.lock().resources.contains_key(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn take_chunk_failure(&self) -> bool {
        self.failing_chunks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn unknown(operation: &str, id: &ResourceId) -> Error {
    Error::target(operation, format!("resource {id} does not exist"))
}

fn check_mode(operation: &str, resource: &Resource, mode: InstallMode) -> Result<()> {
    match (mode, resource.installed.is_some()) {
        (InstallMode::Install, true) => Err(Error::target(
            operation,
            "resource already has an installation; use reinstall or upgrade",
        )),
        (InstallMode::Upgrade, false) => {
            Err(Error::target(operation, "nothing installed to upgrade"))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl DeployTarget for MemoryTarget {
    async fn create_resource(&self, requested: Option<&ResourceId>) -> Result<ResourceId> {
        let mut state = self.lock();
        let id = match requested {
            Some(id) if state.resources.contains_key(id) => id.clone(),
            _ => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let id = ResourceId::new(format!("res-{n:04}"));
                state.resources.insert(id.clone(), Resource::default());
                id
            }
        };
        state.calls.push(TargetCall::Create {
            requested: requested.cloned(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn upload_whole(
        &self,
        id: &ResourceId,
        bytes: &[u8],
        _init_args: &[u8],
        mode: InstallMode,
    ) -> Result<()> {
        let mut state = self.lock();
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| unknown("install", id))?;
        check_mode("install", resource, mode)?;
        resource.installed = Some(ChunkHash::of(bytes));
        resource.running = true;
        state.calls.push(TargetCall::UploadWhole {
            id: id.clone(),
            size: bytes.len(),
            mode,
        });
        Ok(())
    }

    async fn upload_chunk(&self, id: &ResourceId, hash: &ChunkHash, bytes: &[u8]) -> Result<()> {
        if self.take_chunk_failure() {
            return Err(Error::target("upload chunk", "injected failure"));
        }
        if ChunkHash::of(bytes) != *hash {
            return Err(Error::target("upload chunk", format!("hash mismatch for {hash}")));
        }
        let mut state = self.lock();
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| unknown("upload chunk", id))?;
        resource.chunks.insert(*hash, bytes.to_vec());
        state.calls.push(TargetCall::UploadChunk {
            id: id.clone(),
            hash: *hash,
        });
        Ok(())
    }

    async fn install_from_chunks(
        &self,
        id: &ResourceId,
        chunks: &[ChunkHash],
        whole: &ChunkHash,
        _init_args: &[u8],
        mode: InstallMode,
    ) -> Result<()> {
        let mut state = self.lock();
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| unknown("install", id))?;
        check_mode("install", resource, mode)?;

        let mut assembled = Vec::new();
        for hash in chunks {
            let chunk = resource
                .chunks
                .get(hash)
                .ok_or_else(|| Error::target("install", format!("chunk {hash} was never uploaded")))?;
            assembled.extend_from_slice(chunk);
        }
        if ChunkHash::of(&assembled) != *whole {
            return Err(Error::target("install", "assembled artifact hash mismatch"));
        }

        resource.chunks.clear();
        resource.installed = Some(*whole);
        resource.running = true;
        state.calls.push(TargetCall::InstallFromChunks {
            id: id.clone(),
            chunks: chunks.to_vec(),
            whole: *whole,
            mode,
        });
        Ok(())
    }

    async fn status(&self, id: &ResourceId) -> Result<ResourceStatus> {
        let state = self.lock();
        let resource = state.resources.get(id).ok_or_else(|| unknown("status", id))?;
        Ok(match (resource.installed, resource.running) {
            (None, _) => ResourceStatus::NotInstalled,
            (Some(_), false) => ResourceStatus::Stopped,
            (Some(_), true) => ResourceStatus::Running,
        })
    }

    async fn stop(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.lock();
        let resource = state.resources.get_mut(id).ok_or_else(|| unknown("stop", id))?;
        resource.running = false;
        state.calls.push(TargetCall::Stop(id.clone()));
        Ok(())
    }

    async fn remove(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.lock();
        state
            .resources
            .remove(id)
            .ok_or_else(|| unknown("remove", id))?;
        state.calls.push(TargetCall::Remove(id.clone()));
        Ok(())
    }

    async fn instance_id(&self) -> Result<Option<String>> {
        Ok(self.lock().instance.clone())
    }
}
