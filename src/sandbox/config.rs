//! Sandbox configuration
//!
//! Resolves a `TestPackage` into everything needed to create its context.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::cache::allocate_cache_path;
use super::paths::compute_private_search_path;
use crate::core::error::{Result, SandboxError};
use crate::core::package::{TestPackage, SHADOW_COPY_FILES};

/// Every sandbox uses the same application name
pub const APPLICATION_NAME: &str = "Tests";

/// Resolved, immutable sandbox configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub application_name: String,
    pub base_path: PathBuf,
    /// Always absolute; a relative config file name is joined onto `base_path`
    pub config_file: PathBuf,
    pub private_search_path: Option<String>,
    pub copy_on_load: bool,
    /// Directories whose files are copied on load
    pub copy_on_load_dirs: Option<PathBuf>,
    /// Present only when `copy_on_load` is set
    pub cache_path: Option<PathBuf>,
}

/// Build the configuration for `package`, allocating a cache directory under
/// `cache_root` when copy-on-load is enabled.
pub fn build(package: &TestPackage, cache_root: &Path) -> Result<SandboxConfig> {
    // Relative package paths resolve against the current directory.
    let full_path = absolute(&package.full_path)?;

    let base_path = match &package.base_path {
        Some(base) if !base.as_os_str().is_empty() => absolute(base)?,
        _ => full_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                SandboxError::Configuration(format!(
                    "cannot determine base directory of {}",
                    full_path.display()
                ))
            })?,
    };

    let config_file = match &package.config_file {
        Some(file) if !file.as_os_str().is_empty() => file.clone(),
        _ => {
            let file_name = full_path.file_name().ok_or_else(|| {
                SandboxError::Configuration(format!(
                    "test package path {} has no file name",
                    full_path.display()
                ))
            })?;
            let mut config_name = file_name.to_os_string();
            config_name.push(".config");
            PathBuf::from(config_name)
        }
    };
    // Some hosts resolve relative config paths against their own working
    // directory, so this is always absolute.
    let config_file = base_path.join(config_file);

    let private_search_path = if package.auto_search_path {
        let assemblies = package
            .assemblies
            .iter()
            .map(|assembly| absolute(assembly))
            .collect::<Result<Vec<_>>>()?;
        compute_private_search_path(&base_path, &assemblies)
    } else {
        package
            .private_search_path
            .clone()
            .filter(|path| !path.is_empty())
    };

    let copy_on_load = package.bool_setting(SHADOW_COPY_FILES, true)?;

    let (copy_on_load_dirs, cache_path) = if copy_on_load {
        (
            Some(base_path.clone()),
            Some(allocate_cache_path(cache_root)?),
        )
    } else {
        (None, None)
    };

    let config = SandboxConfig {
        application_name: APPLICATION_NAME.to_string(),
        base_path,
        config_file,
        private_search_path,
        copy_on_load,
        copy_on_load_dirs,
        cache_path,
    };
    debug!("Resolved sandbox config: {:?}", config);

    Ok(config)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|err| {
        SandboxError::Configuration(format!("cannot resolve {}: {}", path.display(), err))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_default_package() {
        let cache_root = TempDir::new().unwrap();
        let package = TestPackage::new("/t/Foo.dll")
            .with_assemblies(["/t/Foo.dll", "/t/lib/Bar.dll"])
            .with_auto_search_path(true);

        let config = build(&package, cache_root.path()).unwrap();

        assert_eq!(config.application_name, "Tests");
        assert_eq!(config.base_path, PathBuf::from("/t"));
        assert_eq!(config.config_file, PathBuf::from("/t/Foo.dll.config"));
        assert_eq!(config.private_search_path.as_deref(), Some("lib"));
        assert!(config.copy_on_load);
        assert_eq!(config.copy_on_load_dirs, Some(PathBuf::from("/t")));

        let cache_path = config.cache_path.unwrap();
        assert!(cache_path.starts_with(cache_root.path()));
        assert!(cache_path.is_dir());
    }

    #[test]
    fn test_explicit_values_win() {
        let cache_root = TempDir::new().unwrap();
        let mut package = TestPackage::new("/t/Foo.dll").with_setting(SHADOW_COPY_FILES, false);
        package.base_path = Some("/work".into());
        package.config_file = Some("app.config".into());
        package.private_search_path = Some("bin:lib".into());

        let config = build(&package, cache_root.path()).unwrap();

        assert_eq!(config.base_path, PathBuf::from("/work"));
        assert_eq!(config.config_file, PathBuf::from("/work/app.config"));
        assert_eq!(config.private_search_path.as_deref(), Some("bin:lib"));
        assert!(!config.copy_on_load);
        assert_eq!(config.cache_path, None);
        assert_eq!(config.copy_on_load_dirs, None);
        assert_eq!(std::fs::read_dir(cache_root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_auto_search_path_overrides_explicit() {
        let cache_root = TempDir::new().unwrap();
        let mut package = TestPackage::new("/t/Foo.dll")
            .with_auto_search_path(true)
            .with_setting(SHADOW_COPY_FILES, false);
        package.private_search_path = Some("ignored".into());

        let config = build(&package, cache_root.path()).unwrap();
        assert_eq!(config.private_search_path, None);
    }

    #[test]
    fn test_absolute_config_file_is_kept() {
        let cache_root = TempDir::new().unwrap();
        let mut package = TestPackage::new("/t/Foo.dll").with_setting(SHADOW_COPY_FILES, false);
        package.config_file = Some("/etc/tests/Foo.config".into());

        let config = build(&package, cache_root.path()).unwrap();
        assert_eq!(config.config_file, PathBuf::from("/etc/tests/Foo.config"));
    }

    #[test]
    fn test_relative_package_resolves_against_current_dir() {
        let cache_root = TempDir::new().unwrap();
        let cwd = std::env::current_dir().unwrap();
        let package = TestPackage::new("tests/Foo.dll")
            .with_assemblies(["tests/Foo.dll", "tests/lib/Bar.dll"])
            .with_auto_search_path(true)
            .with_setting(SHADOW_COPY_FILES, false);

        let config = build(&package, cache_root.path()).unwrap();

        assert!(config.base_path.is_absolute());
        assert!(config.config_file.is_absolute());
        assert_eq!(config.base_path, cwd.join("tests"));
        assert_eq!(config.config_file, cwd.join("tests").join("Foo.dll.config"));
        assert_eq!(config.private_search_path.as_deref(), Some("lib"));
    }

    #[test]
    fn test_bare_file_name_uses_current_dir() {
        let cache_root = TempDir::new().unwrap();
        let package = TestPackage::new("Foo.dll").with_setting(SHADOW_COPY_FILES, false);

        let config = build(&package, cache_root.path()).unwrap();

        assert_eq!(config.base_path, std::env::current_dir().unwrap());
        assert!(config.config_file.ends_with("Foo.dll.config"));
    }

    #[test]
    fn test_relative_base_path_is_made_absolute() {
        let cache_root = TempDir::new().unwrap();
        let mut package = TestPackage::new("/t/Foo.dll").with_setting(SHADOW_COPY_FILES, false);
        package.base_path = Some("work".into());

        let config = build(&package, cache_root.path()).unwrap();

        let expected = std::env::current_dir().unwrap().join("work");
        assert_eq!(config.base_path, expected);
        assert_eq!(config.config_file, expected.join("Foo.dll.config"));
    }

    #[cfg(unix)]
    #[test]
    fn test_package_without_directory_is_rejected() {
        let cache_root = TempDir::new().unwrap();
        let package = TestPackage::new("/");

        assert!(matches!(
            build(&package, cache_root.path()),
            Err(SandboxError::Configuration(_))
        ));
    }

    #[test]
    fn test_cache_allocation_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file_root = dir.path().join("file");
        std::fs::write(&file_root, b"").unwrap();

        let package = TestPackage::new("/t/Foo.dll");
        assert!(matches!(
            build(&package, &file_root),
            Err(SandboxError::CacheAllocation { .. })
        ));
    }
}
