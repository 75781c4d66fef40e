//! Lifecycle of deployable units for cask.
//!
//! A deployable unit moves through `create`, `build`, `bindings`,
//! `install` and `deploy`. [`Lifecycle`] expresses that sequence as an
//! ordinary [`cask_core::Scope`], so it is scheduled, cached and
//! deduplicated like any other task tree.
//!
//! The pieces:
//!
//! - [`DeployTarget`]: the environment units are installed into
//! - [`transfer`]: single-call or chunked artifact upload with retries
//! - [`ResourceIdMap`]: persistent unit → network → resource id map
//! - [`MemoryTarget`]: in-process target for tests and dry runs

pub mod chunk;
pub mod error;
pub mod ids;
pub mod memory;
pub mod pipeline;
pub mod target;

pub use chunk::{
    ChunkHash, ChunkPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_THRESHOLD,
    TransferPlan, TransferSummary, plan_transfer, transfer, upload_chunked,
};
pub use error::{Error, Result};
pub use ids::ResourceIdMap;
pub use memory::{MemoryTarget, TargetCall};
pub use pipeline::{
    Artifact, ArtifactSource, DEFAULT_NETWORK, DEPLOY_TAG, DeployReceipt, InstallReceipt, Lifecycle,
};
pub use target::{DeployTarget, InstallMode, ResourceId, ResourceStatus, TargetProbe};
