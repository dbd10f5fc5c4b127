//! Test package descriptor
//!
//! Describes a unit of tests to run. Supplied by the caller and never
//! modified by the sandbox layer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::error::{Result, SandboxError};

/// Setting key controlling copy-on-load
pub const SHADOW_COPY_FILES: &str = "ShadowCopyFiles";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestPackage {
    /// Full path of the test file
    pub full_path: PathBuf,
    /// Package name; the file name of `full_path` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_search_path: Option<String>,
    /// Compute the private search path from `assemblies`
    #[serde(default)]
    pub auto_search_path: bool,
    /// Absolute paths of the libraries making up the package
    #[serde(default)]
    pub assemblies: Vec<PathBuf>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl TestPackage {
    pub fn new(full_path: impl AsRef<Path>) -> Self {
        let full_path = full_path.as_ref().to_path_buf();
        Self {
            assemblies: vec![full_path.clone()],
            full_path,
            ..Default::default()
        }
    }

    /// Load a package descriptor from a TOML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs_err::read_to_string(path)?;
        let package = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid package file {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Invalid package file {}", path.display()))?,
        };
        Ok(package)
    }

    pub fn with_assemblies(
        mut self,
        assemblies: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        self.assemblies = assemblies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auto_search_path(mut self, value: bool) -> Self {
        self.auto_search_path = value;
        self
    }

    pub fn with_setting(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Package name, falling back to the file name of the full path
    pub fn name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|name| !name.is_empty()) {
            return name.to_string();
        }
        self.full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.full_path.to_string_lossy().into_owned())
    }

    /// Read a boolean setting, using `default` when the key is absent
    pub fn bool_setting(&self, key: &str, default: bool) -> Result<bool> {
        match self.settings.get(key) {
            None => Ok(default),
            Some(serde_json::Value::Bool(value)) => Ok(*value),
            Some(other) => Err(SandboxError::Configuration(format!(
                "setting `{}` must be a boolean, got {}",
                key, other
            ))),
        }
    }
}
