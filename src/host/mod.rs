//! Host module - Isolation backend abstraction
//!
//! An `ExecutionHost` turns a resolved `SandboxConfig` into a live
//! `ExecutionContext`:
//! - `ProcessHost`: one child process (and process group) per sandbox
//!
//! The host module does NOT:
//! - Decide configuration (that's `sandbox::config`)
//! - Own cache directories
//! - Run or discover tests

pub mod process;

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sandbox::config::SandboxConfig;
use crate::sandbox::resolver::ResolverRegistration;

pub const ENV_DOMAIN_NAME: &str = "TESTHOST_DOMAIN_NAME";
pub const ENV_APPLICATION_NAME: &str = "TESTHOST_APPLICATION_NAME";
pub const ENV_APPLICATION_BASE: &str = "TESTHOST_APPLICATION_BASE";
pub const ENV_CONFIG_FILE: &str = "TESTHOST_CONFIG_FILE";
pub const ENV_PRIVATE_BIN_PATH: &str = "TESTHOST_PRIVATE_BIN_PATH";
pub const ENV_SHADOW_COPY: &str = "TESTHOST_SHADOW_COPY";
pub const ENV_SHADOW_COPY_DIRS: &str = "TESTHOST_SHADOW_COPY_DIRS";
pub const ENV_CACHE_PATH: &str = "TESTHOST_CACHE_PATH";
pub const ENV_IN_SANDBOX: &str = "TESTHOST_IN_SANDBOX";

/// Capabilities granted to a new context.
///
/// A context receives exactly the environment listed here. `inherit()`
/// copies the creator's own environment: the child runs with the same
/// standing as its creator. This is inheritance, not a security boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustDescriptor {
    pub env: BTreeMap<OsString, OsString>,
}

impl TrustDescriptor {
    /// Snapshot of the creator's environment
    pub fn inherit() -> Self {
        Self {
            env: std::env::vars_os().collect(),
        }
    }

    /// No inherited environment at all
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .insert(key.as_ref().to_os_string(), value.as_ref().to_os_string());
        self
    }
}

/// Setup messages sent to a context, one JSON document per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Build a dependency resolver inside the context
    Resolver(ResolverRegistration),
    /// Attach out-of-band data under `key`
    Data {
        key: String,
        value: serde_json::Value,
    },
}

/// Backend creating isolated execution contexts
#[async_trait]
pub trait ExecutionHost: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Create a context named `name` configured from `config`
    async fn create_context(
        &self,
        name: &str,
        config: &SandboxConfig,
        trust: &TrustDescriptor,
    ) -> Result<Box<dyn ExecutionContext>>;
}

/// A live isolated execution context
#[async_trait]
pub trait ExecutionContext: Send {
    fn name(&self) -> &str;

    /// Have the context build its own resolver from `registration`
    async fn install_resolver(&mut self, registration: &ResolverRegistration) -> Result<()>;

    /// Attach out-of-band data
    async fn set_data(&mut self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Destroy the context and release everything it holds
    async fn unload(self: Box<Self>) -> Result<()>;
}

// Re-exports
pub use process::ProcessHost;
