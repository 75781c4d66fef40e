//! Task model, dependency resolution and concurrent execution for cask.
//!
//! # Overview
//!
//! - [`Task`]: an immutable unit of work with declared and provided
//!   dependencies, parameters, tags and an optional caching policy
//! - [`Scope`]: a hierarchical namespace of tasks addressed by `:` paths
//! - [`Executor`]: plans a task's dependency closure and runs it with
//!   maximal parallelism, caching and in-flight deduplication
//! - [`Engine`]: a root scope bound to an executor and a run context
//!
//! # Example
//!
//! ```ignore
//! use cask_core::{Args, Engine, EngineConfig, Scope, Task};
//!
//! let build = Task::builder("compile the unit")
//!     .run(|_| async { Ok(serde_json::json!("wasm")) })
//!     .build()?;
//! let root = Scope::new("").with_task("build", build)?;
//!
//! let engine = Engine::new(root, &EngineConfig::discover(".".as_ref())?)?;
//! let report = engine.run_path("build", &Args::new()).await?;
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod inflight;
pub mod params;
pub mod plan;
pub mod reference;
pub mod report;
pub mod scope;
pub mod task;
pub mod task_cache;
pub mod telemetry;

pub use config::{CONFIG_FILE, CacheMode, EngineConfig, LogConfig};
pub use context::{EnvironmentProbe, RunContext};
pub use engine::Engine;
pub use error::{Error, GraphError, Result, TaskError, TaskFailure};
pub use executor::{Executor, ExecutorConfig};
pub use inflight::InFlightRegistry;
pub use params::{Args, ArgsError, Param, ParamKind, resolve_args};
pub use plan::ExecutionPlan;
pub use reference::{Composite, DependencyRef};
pub use report::{Resolution, RunReport, TaskSuccess};
pub use scope::{PathIndex, Scope, ScopeEntry};
pub use task::{
    CacheConfig, Codec, JsonCodec, OutputType, ResolvedInput, Task, TaskBuilder, TaskContext,
    TaskId,
};
pub use task_cache::TaskCache;
pub use telemetry::{TracingConfig, TracingFormat, init_tracing};

/// Re-exported so operations can name the epoch type without depending on
/// the cache crate directly.
pub use cask_cache::{EnvironmentEpoch, EpochToken};
