//! Errors surfaced while creating a sandbox
//!
//! Teardown has no error type: every failure there is logged and reported
//! through `TeardownReport` instead.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The package descriptor cannot be turned into a sandbox configuration
    #[error("Invalid test package: {0}")]
    Configuration(String),

    /// The cache root is unusable or a stale directory could not be removed
    #[error("Invalid cache path: {}", .path.display())]
    CacheAllocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another live sandbox already uses this name
    #[error("Sandbox `{0}` is already loaded")]
    NameInUse(String),

    #[error("Failed to create execution context `{name}`")]
    ContextCreation {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to install dependency resolver into `{name}`")]
    ResolverInstall {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
