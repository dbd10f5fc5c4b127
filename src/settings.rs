//! Host settings
//!
//! Loaded from an optional TOML file and overridden from the environment.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

/// Default agent program launched for every sandbox
pub const DEFAULT_AGENT_PROGRAM: &str = "testhost-agent";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Cache root override; may contain environment variable references
    #[serde(rename = "shadowfiles.path")]
    pub shadow_files_path: Option<String>,
    /// Program started as the isolated execution context
    pub agent_program: PathBuf,
    pub agent_args: Vec<String>,
    /// Runtime libraries every sandbox must be able to resolve.
    /// Empty means the running host executable.
    pub core_libraries: Vec<PathBuf>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            shadow_files_path: None,
            agent_program: PathBuf::from(DEFAULT_AGENT_PROGRAM),
            agent_args: Vec::new(),
            core_libraries: Vec::new(),
        }
    }
}

impl HostSettings {
    /// Load settings from `TESTHOST_SETTINGS` (if set) and the environment
    pub fn load() -> anyhow::Result<Self> {
        let mut settings = match std::env::var("TESTHOST_SETTINGS") {
            Ok(path) if !path.is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs_err::read_to_string(path)?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("SHADOWFILES_PATH") {
            self.shadow_files_path = Some(path);
        }
        if let Ok(agent) = std::env::var("TESTHOST_AGENT") {
            if !agent.is_empty() {
                self.agent_program = PathBuf::from(agent);
            }
        }
    }
}

/// Global host settings
static SETTINGS: OnceLock<HostSettings> = OnceLock::new();

/// Install the process-wide settings
pub fn init_settings(settings: HostSettings) -> anyhow::Result<()> {
    SETTINGS
        .set(settings)
        .map_err(|_| anyhow::anyhow!("Host settings already initialized"))?;

    Ok(())
}

/// Get the process-wide settings
pub fn get_settings() -> &'static HostSettings {
    SETTINGS.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<HostSettings> = OnceLock::new();

        warn!("Host settings not initialized, using default");
        DEFAULT.get_or_init(HostSettings::default)
    })
}

/// Whether this process was started as a sandbox by another host
pub fn running_in_sandbox() -> bool {
    std::env::var(crate::host::ENV_IN_SANDBOX)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings() {
        let settings = HostSettings::from_toml(
            r#"
"shadowfiles.path" = "%TEMP%/cache"
agent_program = "/opt/testhost/agent"
core_libraries = ["/opt/testhost/core.so"]
"#,
        )
        .unwrap();

        assert_eq!(settings.shadow_files_path.as_deref(), Some("%TEMP%/cache"));
        assert_eq!(settings.agent_program, PathBuf::from("/opt/testhost/agent"));
        assert_eq!(settings.core_libraries.len(), 1);
        assert!(settings.agent_args.is_empty());
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = HostSettings::from_toml("").unwrap();
        assert!(settings.shadow_files_path.is_none());
        assert_eq!(settings.agent_program, PathBuf::from(DEFAULT_AGENT_PROGRAM));
    }
}
