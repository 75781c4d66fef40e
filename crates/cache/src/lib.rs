//! Task result caching for cask
//!
//! This crate provides the caching infrastructure for cask task execution:
//! - A key to bytes [`CacheStore`] interface with filesystem and in-memory stores
//! - Deterministic cache key computation from a task's resolved input
//! - The [`EnvironmentEpoch`] that invalidates environment-sensitive entries
//!
//! # Cache Key Computation
//!
//! Cache keys are the SHA-256 of a canonical JSON [`CacheKeyEnvelope`] holding:
//! - The task's cache namespace
//! - The key the task derived from its resolved input (arguments plus
//!   dependency results)
//! - The environment epoch token, for environment-sensitive tasks
//! - The cask version
//!
//! Stores hold opaque bytes and have no TTL; invalidation is explicit.

mod epoch;
mod error;
mod fs;
mod key;
mod store;

pub use epoch::{EnvironmentEpoch, EpochToken};
pub use error::{Error, Result};
pub use fs::{FsStore, cache_root};
pub use key::{CacheKeyEnvelope, compute_cache_key};
pub use store::{CacheStore, MemoryStore};
