//! Engine configuration
//!
//! Settings are read from an optional `cask.toml` and then overridden by
//! `CASK_*` environment variables:
//!
//! | Variable            | Setting        |
//! |---------------------|----------------|
//! | `CASK_MAX_PARALLEL` | `max_parallel` |
//! | `CASK_CACHE`        | `cache`        |
//! | `CASK_CACHE_DIR`    | `cache_dir`    |
//! | `CASK_NETWORK`      | `network`      |
//! | `CASK_IDS_FILE`     | `ids_file`     |
//! | `CASK_LOG_LEVEL`    | `log.level`    |
//! | `CASK_LOG_FORMAT`   | `log.format`   |

use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;
use crate::telemetry::{TracingConfig, TracingFormat, parse_level};
use cask_cache::{CacheStore, FsStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Name of the configuration file looked up in a project directory
pub const CONFIG_FILE: &str = "cask.toml";

/// Where task results are cached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// On disk, surviving across processes
    #[default]
    Fs,
    /// In memory, for the lifetime of the process
    Memory,
    /// No caching
    Disabled,
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "disk" => Ok(Self::Fs),
            "memory" | "mem" => Ok(Self::Memory),
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            _ => Err(Error::configuration(format!("Unknown cache mode: {s}"))),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level name (`trace` through `error`)
    pub level: String,
    /// Output format
    pub format: TracingFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: TracingFormat::Compact,
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrently running operations (0 = unbounded)
    pub max_parallel: usize,
    /// Cache backend
    pub cache: CacheMode,
    /// Cache directory for the filesystem backend
    pub cache_dir: Option<PathBuf>,
    /// Deployment network name
    pub network: String,
    /// Resource id map file
    pub ids_file: PathBuf,
    /// Logging
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 0,
            cache: CacheMode::Fs,
            cache_dir: None,
            network: "local".to_string(),
            ids_file: PathBuf::from(".cask/ids.json"),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse TOML settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed TOML or unknown values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid {CONFIG_FILE}: {e}")))
    }

    /// Read settings from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read config"))?;
        debug!(path = %path.display(), "Loaded configuration");
        Self::from_toml_str(&content)
    }

    /// Settings for the project in `dir`: `cask.toml` if present, defaults
    /// otherwise, then environment overrides. A relative `ids_file` is
    /// resolved against `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an override is invalid.
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let config = if path.is_file() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        let mut config = config.apply_env()?;
        if config.ids_file.is_relative() {
            config.ids_file = dir.join(&config.ids_file);
        }
        Ok(config)
    }

    /// Apply `CASK_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `CASK_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("CASK_MAX_PARALLEL") {
            self.max_parallel = value.trim().parse().map_err(|_| {
                Error::configuration(format!("CASK_MAX_PARALLEL must be a number, got '{value}'"))
            })?;
        }
        if let Some(value) = get("CASK_CACHE") {
            self.cache = value.parse()?;
        }
        if let Some(value) = get("CASK_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get("CASK_NETWORK") {
            self.network = value;
        }
        if let Some(value) = get("CASK_IDS_FILE") {
            self.ids_file = PathBuf::from(value);
        }
        if let Some(value) = get("CASK_LOG_LEVEL") {
            parse_level(&value)?;
            self.log.level = value;
        }
        if let Some(value) = get("CASK_LOG_FORMAT") {
            self.log.format = value.parse()?;
        }
        Ok(self)
    }

    /// Open the configured cache store, or `None` when caching is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if no writable cache directory can be found.
    pub fn open_store(&self) -> Result<Option<Arc<dyn CacheStore>>> {
        let store: Arc<dyn CacheStore> = match self.cache {
            CacheMode::Disabled => return Ok(None),
            CacheMode::Memory => Arc::new(MemoryStore::new()),
            CacheMode::Fs => match &self.cache_dir {
                Some(dir) => Arc::new(FsStore::new(dir)),
                None => Arc::new(FsStore::at_default_root()?),
            },
        };
        Ok(Some(store))
    }

    /// Executor settings.
    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_parallel: self.max_parallel,
        }
    }

    /// Tracing settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured level is unknown.
    pub fn tracing_config(&self) -> Result<TracingConfig> {
        Ok(TracingConfig {
            format: self.log.format,
            level: parse_level(&self.log.level)?,
            filter: None,
        })
    }
}
