//! Lifecycle scope for a deployable unit
//!
//! [`Lifecycle::scope`] produces a scope named after the unit with the
//! tasks `create`, `build`, `bindings`, `install`, `deploy`, `status`,
//! `stop` and `remove`. `create` runs first: `build` and `bindings` both
//! wait on it. `bindings` additionally waits on `build` when the artifact
//! source asks for sequential bindings; otherwise the two run alongside
//! each other. `install` depends on `create` and `build`, and `deploy` on
//! `install` and `bindings`.
//!
//! Referencing the scope itself resolves to `install`, so dependents
//! receive the installed resource.

use crate::chunk::{ChunkHash, ChunkPolicy, TransferSummary, transfer};
use crate::error::{Error, Result};
use crate::ids::ResourceIdMap;
use crate::target::{DeployTarget, InstallMode, ResourceId, ResourceStatus, TargetProbe};
use async_trait::async_trait;
use cask_core::{CacheConfig, EngineConfig, GraphError, Param, ParamKind, ResolvedInput, Scope, Task, TaskError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

/// Network used when none is chosen
pub const DEFAULT_NETWORK: &str = "local";

/// Tag carried by every `deploy` task
pub const DEPLOY_TAG: &str = "deploy";

/// A built deployable artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name, usually the unit name
    pub name: String,
    /// Hash of `bytes`
    pub hash: ChunkHash,
    /// Artifact content
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Wrap built bytes.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            hash: ChunkHash::of(&bytes),
            bytes,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

/// Produces a unit's artifact and its interface descriptor
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Build the artifact.
    async fn build(&self) -> Result<Artifact>;

    /// Produce the typed interface descriptor.
    ///
    /// `artifact` is present only when
    /// [`requires_sequential_bindings`](Self::requires_sequential_bindings)
    /// returns `true`.
    async fn bindings(&self, artifact: Option<&Artifact>) -> Result<Value>;

    /// Whether bindings are derived from the built artifact and must wait
    /// for it.
    fn requires_sequential_bindings(&self) -> bool {
        false
    }

    /// Encoded initialization arguments passed on install.
    async fn init_args(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Result of an `install` task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    /// Resource the artifact was installed into
    pub resource: ResourceId,
    /// Mode the install used
    pub mode: InstallMode,
    /// What was transferred
    pub transfer: TransferSummary,
}

/// Result of a `deploy` task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployReceipt {
    /// Unit name
    pub unit: String,
    /// Network deployed to
    pub network: String,
    /// Installation details
    pub install: InstallReceipt,
    /// Interface descriptor
    pub bindings: Value,
}

/// Lifecycle tasks of one deployable unit on one network
#[derive(Clone)]
pub struct Lifecycle {
    unit: String,
    network: String,
    source: Arc<dyn ArtifactSource>,
    target: Arc<dyn DeployTarget>,
    ids: Arc<ResourceIdMap>,
    policy: ChunkPolicy,
}

impl Lifecycle {
    /// Lifecycle of `unit` on the default network.
    pub fn new(
        unit: impl Into<String>,
        source: Arc<dyn ArtifactSource>,
        target: Arc<dyn DeployTarget>,
        ids: Arc<ResourceIdMap>,
    ) -> Self {
        Self {
            unit: unit.into(),
            network: DEFAULT_NETWORK.to_string(),
            source,
            target,
            ids,
            policy: ChunkPolicy::default(),
        }
    }

    /// Lifecycle of `unit` on the configured network.
    pub fn configured(
        unit: impl Into<String>,
        source: Arc<dyn ArtifactSource>,
        target: Arc<dyn DeployTarget>,
        ids: Arc<ResourceIdMap>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(unit, source, target, ids).on_network(config.network.clone())
    }

    /// Deploy to `network` instead.
    #[must_use]
    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Override the transfer policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Unit name.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Network name.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Probe reporting the target's instance id, for
    /// [`cask_core::RunContext::with_probe`].
    #[must_use]
    pub fn probe(&self) -> TargetProbe {
        TargetProbe::new(Arc::clone(&self.target))
    }

    /// Build the unit's scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit name is not a valid scope name.
    pub fn scope(&self) -> std::result::Result<Scope, GraphError> {
        let create = self.create_task()?;
        let build = self.build_task(&create)?;
        let bindings = self.bindings_task(&create, &build)?;
        let install = self.install_task(&create, &build)?;
        let deploy = self.deploy_task(&install, &bindings)?;

        Scope::new(self.unit.clone())
            .describe(format!("Lifecycle of {} on {}", self.unit, self.network))
            .with_task("create", create)?
            .with_task("build", build)?
            .with_task("bindings", bindings)?
            .with_task("install", install)?
            .with_task("deploy", deploy)?
            .with_task("status", self.status_task()?)?
            .with_task("stop", self.stop_task()?)?
            .with_task("remove", self.remove_task()?)?
            .with_default("install")
    }

    fn namespace(&self, task: &str) -> String {
        format!("lifecycle:{}:{}:{task}", self.unit, self.network)
    }

    fn recorded(&self) -> Result<ResourceId> {
        self.ids
            .get(&self.unit, &self.network)
            .ok_or_else(|| Error::UnknownResource {
                unit: self.unit.clone(),
                network: self.network.clone(),
            })
    }

    fn create_task(&self) -> std::result::Result<Task, GraphError> {
        let this = self.clone();

        // Uncached: reuse goes through the id map, and a removed resource must
        // never come back from a stale entry.
        Task::builder(format!("{}: create resource", self.unit))
            .environment_sensitive()
            .run_typed(move |_| {
                let this = this.clone();
                async move {
                    let requested = this.ids.get(&this.unit, &this.network);
                    let id = this.target.create_resource(requested.as_ref()).await?;
                    if requested.as_ref() != Some(&id) {
                        info!(unit = %this.unit, network = %this.network, resource = %id, "Allocated resource");
                    }
                    this.ids.set(&this.unit, &this.network, id.clone()).await?;
                    Ok::<_, TaskError>(id)
                }
            })
            .build()
    }

    fn build_task(&self, create: &Task) -> std::result::Result<Task, GraphError> {
        let source = Arc::clone(&self.source);
        Task::builder(format!("{}: build artifact", self.unit))
            .dependency("create", create)
            .run_typed(move |_| {
                let source = Arc::clone(&source);
                async move { Ok::<_, TaskError>(source.build().await?) }
            })
            .build()
    }

    fn bindings_task(&self, create: &Task, build: &Task) -> std::result::Result<Task, GraphError> {
        let source = Arc::clone(&self.source);
        let sequential = self.source.requires_sequential_bindings();
        let mut builder = Task::builder(format!("{}: generate bindings", self.unit))
            .dependency("create", create);
        if sequential {
            builder = builder.dependency("build", build);
        }
        builder
            .run(move |ctx| {
                let source = Arc::clone(&source);
                async move {
                    let artifact = if sequential {
                        Some(ctx.dep::<Artifact>("build")?)
                    } else {
                        None
                    };
                    Ok::<Value, TaskError>(source.bindings(artifact.as_ref()).await?)
                }
            })
            .build()
    }

    fn install_task(&self, create: &Task, build: &Task) -> std::result::Result<Task, GraphError> {
        let this = self.clone();
        Task::builder(format!("{}: install artifact", self.unit))
            .param(
                Param::named("mode", ParamKind::String)
                    .with_default("auto")
                    .describe("auto, install, reinstall or upgrade"),
            )
            .dependency("create", create)
            .dependency("build", build)
            .cached(CacheConfig::new(install_key).with_namespace(self.namespace("install")))
            .environment_sensitive()
            .run_typed(move |ctx| {
                let this = this.clone();
                async move {
                    let resource: ResourceId = ctx.dep("create")?;
                    let artifact: Artifact = ctx.dep("build")?;
                    let requested = ctx
                        .arg::<String>("mode")?
                        .map(|mode| mode.parse::<InstallMode>())
                        .transpose()?
                        .unwrap_or_default();

                    let status = this.target.status(&resource).await?;
                    let mode = requested.resolve(status);
                    let init_args = this.source.init_args().await?;
                    let transfer = transfer(
                        this.target.as_ref(),
                        &resource,
                        &artifact.bytes,
                        &init_args,
                        mode,
                        &this.policy,
                    )
                    .await?;
                    info!(
                        unit = %this.unit,
                        resource = %resource,
                        ?mode,
                        chunked = transfer.is_chunked(),
                        "Installed artifact"
                    );
                    Ok::<_, TaskError>(InstallReceipt {
                        resource,
                        mode,
                        transfer,
                    })
                }
            })
            .build()
    }

    fn deploy_task(&self, install: &Task, bindings: &Task) -> std::result::Result<Task, GraphError> {
        let (unit, network) = (self.unit.clone(), self.network.clone());
        Task::builder(format!("{}: deploy", self.unit))
            .tag(DEPLOY_TAG)
            .dependency("install", install)
            .dependency("bindings", bindings)
            .run_typed(move |ctx| {
                let (unit, network) = (unit.clone(), network.clone());
                async move {
                    Ok::<_, TaskError>(DeployReceipt {
                        unit,
                        network,
                        install: ctx.dep("install")?,
                        bindings: ctx.dep("bindings")?,
                    })
                }
            })
            .build()
    }

    fn status_task(&self) -> std::result::Result<Task, GraphError> {
        let this = self.clone();
        Task::builder(format!("{}: status", self.unit))
            .environment_sensitive()
            .run_typed(move |_| {
                let this = this.clone();
                async move {
                    let id = this.recorded()?;
                    Ok::<ResourceStatus, TaskError>(this.target.status(&id).await?)
                }
            })
            .build()
    }

    fn stop_task(&self) -> std::result::Result<Task, GraphError> {
        let this = self.clone();
        Task::builder(format!("{}: stop", self.unit))
            .run_typed(move |_| {
                let this = this.clone();
                async move {
                    let id = this.recorded()?;
                    this.target.stop(&id).await?;
                    Ok::<_, TaskError>(id)
                }
            })
            .build()
    }

    fn remove_task(&self) -> std::result::Result<Task, GraphError> {
        let this = self.clone();
        Task::builder(format!("{}: remove", self.unit))
            .run_typed(move |_| {
                let this = this.clone();
                async move {
                    let id = this.recorded()?;
                    this.target.remove(&id).await?;
                    this.ids.remove(&this.unit, &this.network).await?;
                    info!(unit = %this.unit, network = %this.network, resource = %id, "Removed resource");
                    Ok::<_, TaskError>(id)
                }
            })
            .build()
    }
}

/// Install key: the mode argument, the resource and the artifact hash.
///
/// Artifact bytes are left out; the hash already identifies them.
fn install_key(_: &Task, input: &ResolvedInput) -> std::result::Result<String, TaskError> {
    let hash = input
        .dependencies
        .get("build")
        .and_then(|artifact| artifact.get("hash"))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(serde_json::to_string(&json!({
        "args": input.args,
        "resource": input.dependencies.get("create"),
        "artifact": hash,
    }))?)
}
