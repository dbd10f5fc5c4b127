//! Dependency resolver installed inside each sandbox
//!
//! Knows where the host's own runtime libraries live so code loaded in the
//! sandbox can find them even though they are outside its search path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(target_os = "windows")]
const LIBRARY_EXTENSIONS: &[&str] = &["dll"];
#[cfg(target_os = "macos")]
const LIBRARY_EXTENSIONS: &[&str] = &["dylib", "so", "dll"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const LIBRARY_EXTENSIONS: &[&str] = &["so", "dll"];

/// Registration sent to a context so it can build its own resolver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverRegistration {
    pub files: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
}

impl ResolverRegistration {
    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    pub fn add_directory(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.directories.contains(&path) {
            self.directories.push(path);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    files: Vec<PathBuf>,
    directories: Vec<PathBuf>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from a registration received by the context
    pub fn from_registration(registration: &ResolverRegistration) -> Self {
        let mut resolver = Self::new();
        for file in &registration.files {
            resolver.add_file(file);
        }
        for dir in &registration.directories {
            resolver.add_directory(dir);
        }
        resolver
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        if !self.files.contains(&path) {
            debug!("Resolver: added file {}", path.display());
            self.files.push(path);
        }
    }

    pub fn add_directory(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        if !self.directories.contains(&path) {
            debug!("Resolver: added directory {}", path.display());
            self.directories.push(path);
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Locate a library by name.
    ///
    /// Registered files match on their full file name or their stem.
    /// Directories are probed in registration order, bare name first.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if let Some(file) = self.files.iter().find(|file| {
            file.file_name().is_some_and(|n| n == name)
                || file.file_stem().is_some_and(|s| s == name)
        }) {
            return Some(file.clone());
        }

        for dir in &self.directories {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
            for ext in LIBRARY_EXTENSIONS {
                let candidate = dir.join(format!("{}.{}", name, ext));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        None
    }
}
