//! Deployment target contract
//!
//! A [`DeployTarget`] is the environment deployable units are installed
//! into. Implementations live outside this crate; [`crate::MemoryTarget`]
//! is an in-process stand-in.

use crate::chunk::ChunkHash;
use crate::error::{Error, Result};
use async_trait::async_trait;
use cask_core::{EnvironmentProbe, TaskError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier of a resource allocated by a deployment target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Installation state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Allocated but nothing installed
    NotInstalled,
    /// Installed and stopped
    Stopped,
    /// Installed and running
    Running,
}

/// How an artifact is installed into a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Choose from the resource status
    #[default]
    Auto,
    /// First installation
    Install,
    /// Replace the installation, discarding its state
    Reinstall,
    /// Replace the installation, keeping its state
    Upgrade,
}

impl InstallMode {
    /// Concrete mode for a resource in `status`.
    ///
    /// `Auto` installs into empty resources and upgrades everything else;
    /// explicit modes are kept as requested.
    #[must_use]
    pub const fn resolve(self, status: ResourceStatus) -> Self {
        match (self, status) {
            (Self::Auto, ResourceStatus::NotInstalled) => Self::Install,
            (Self::Auto, _) => Self::Upgrade,
            (explicit, _) => explicit,
        }
    }
}

impl FromStr for InstallMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "install" => Ok(Self::Install),
            "reinstall" => Ok(Self::Reinstall),
            "upgrade" => Ok(Self::Upgrade),
            _ => Err(Error::InstallMode {
                value: s.to_string(),
            }),
        }
    }
}

/// An environment that hosts deployable units
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Allocate a resource, or reuse `requested` if it is still valid.
    async fn create_resource(&self, requested: Option<&ResourceId>) -> Result<ResourceId>;

    /// Install `bytes` in a single call.
    async fn upload_whole(
        &self,
        id: &ResourceId,
        bytes: &[u8],
        init_args: &[u8],
        mode: InstallMode,
    ) -> Result<()>;

    /// Store one chunk of an artifact, identified by its hash.
    async fn upload_chunk(&self, id: &ResourceId, hash: &ChunkHash, bytes: &[u8]) -> Result<()>;

    /// Install the artifact assembled from previously uploaded chunks.
    ///
    /// `chunks` is the ordered hash list; `whole` is the hash of the full
    /// artifact.
    async fn install_from_chunks(
        &self,
        id: &ResourceId,
        chunks: &[ChunkHash],
        whole: &ChunkHash,
        init_args: &[u8],
        mode: InstallMode,
    ) -> Result<()>;

    /// Current installation state.
    async fn status(&self, id: &ResourceId) -> Result<ResourceStatus>;

    /// Stop a running resource.
    async fn stop(&self, id: &ResourceId) -> Result<()>;

    /// Delete a resource.
    async fn remove(&self, id: &ResourceId) -> Result<()>;

    /// Identity of the running environment instance, if it has one.
    ///
    /// A change between runs means the environment restarted.
    async fn instance_id(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Reports a deployment target's instance id as the environment identity.
pub struct TargetProbe {
    target: Arc<dyn DeployTarget>,
}

impl TargetProbe {
    /// Probe `target`.
    pub fn new(target: Arc<dyn DeployTarget>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl EnvironmentProbe for TargetProbe {
    async fn instance_id(&self) -> std::result::Result<Option<String>, TaskError> {
        Ok(self.target.instance_id().await?)
    }
}
