//! Error types for lifecycle operations

use cask_core::TaskError;
use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Lifecycle errors
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("Deployment target failed to {operation}: {message}")]
    #[diagnostic(code(cask::lifecycle::target))]
    Target { operation: String, message: String },

    #[error("Building '{unit}' failed: {message}")]
    #[diagnostic(code(cask::lifecycle::build))]
    Build { unit: String, message: String },

    #[error("Transfer of {what} failed after {attempts} attempts: {message}")]
    #[diagnostic(
        code(cask::lifecycle::transfer),
        help("Check that the deployment target is reachable and retry the install")
    )]
    Transfer {
        what: String,
        attempts: u32,
        message: String,
    },

    #[error("No resource recorded for '{unit}' on network '{network}'")]
    #[diagnostic(
        code(cask::lifecycle::unknown_resource),
        help("Run the unit's create or deploy task first")
    )]
    UnknownResource { unit: String, network: String },

    #[error("Unknown install mode '{value}'")]
    #[diagnostic(
        code(cask::lifecycle::install_mode),
        help("Use one of: auto, install, reinstall, upgrade")
    )]
    InstallMode { value: String },

    #[error("I/O error during {operation}: {}", path.display())]
    #[diagnostic(code(cask::lifecycle::io))]
    Io {
        #[source]
        source: std::io::Error,
        path: Box<Path>,
        operation: String,
    },

    #[error("Serialization error: {message}")]
    #[diagnostic(code(cask::lifecycle::serialization))]
    Serialization { message: String },
}

impl Error {
    /// Create a deployment target error
    pub fn target(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Target {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an artifact build error
    pub fn build(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with path context
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: path.as_ref().into(),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<Error> for TaskError {
    fn from(err: Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, Error>;
