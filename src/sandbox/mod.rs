//! Sandbox module - Isolated execution context lifecycle
//!
//! This module handles:
//! - Private search path computation
//! - Cache directory allocation and best-effort deletion
//! - Configuration resolution from a test package
//! - Sandbox creation and teardown
//!
//! The sandbox module does NOT:
//! - Discover or run tests (that's the agent's job)
//! - Know how a context is isolated (that's the host's job)
//! - Report results

pub mod addins;
pub mod cache;
pub mod config;
pub mod factory;
pub mod paths;
pub mod resolver;
pub mod teardown;

// Re-exports for convenience
pub use addins::{Addin, ExtensionRegistry, ADDIN_REGISTRY_KEY};
pub use cache::{
    allocate_cache_path, delete_tree, next_cache_token, resolve_cache_root, CleanupReport,
};
pub use config::{SandboxConfig, APPLICATION_NAME};
pub use factory::{sandbox_name, FactoryOptions, Sandbox, SandboxFactory, DOMAIN_PREFIX};
pub use paths::{compute_private_search_path, PATH_LIST_SEPARATOR};
pub use resolver::{DependencyResolver, ResolverRegistration};
pub use teardown::{unload, TeardownReport};
