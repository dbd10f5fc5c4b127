//! Extension (add-in) registry handed down to sandboxes

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Key under which the registry is attached to a context
pub const ADDIN_REGISTRY_KEY: &str = "AddinRegistry";

/// Name of the add-in directory next to the host executable
pub const ADDINS_DIR: &str = "addins";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addin {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRegistry {
    addins: Vec<Addin>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every file in `dir` as an add-in, sorted by name.
    /// A missing directory yields an empty registry.
    pub fn scan(dir: &Path) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        if !dir.is_dir() {
            return Ok(registry);
        }

        for entry in fs_err::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            registry.register(name, path);
        }
        registry.addins.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.addins.push(Addin {
            name: name.into(),
            path: path.into(),
        });
    }

    pub fn addins(&self) -> &[Addin] {
        &self.addins
    }

    pub fn is_empty(&self) -> bool {
        self.addins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_addins_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("zeta.dll"), b"").unwrap();
        std::fs::write(dir.path().join("alpha.dll"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let registry = ExtensionRegistry::scan(dir.path()).unwrap();
        let names: Vec<_> = registry.addins().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_scan_missing_directory() {
        let dir = TempDir::new().unwrap();
        let registry = ExtensionRegistry::scan(&dir.path().join("addins")).unwrap();
        assert!(registry.is_empty());
    }
}
