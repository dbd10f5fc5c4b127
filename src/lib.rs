//! Test Host - sandbox manager for isolated test packages
//!
//! Creates, configures and tears down the isolated execution context a
//! test package runs in.

pub mod core;
pub mod host;
pub mod manager;
pub mod sandbox;
pub mod settings;

pub use crate::core::error::{Result, SandboxError};
pub use crate::core::package::TestPackage;
pub use manager::DomainManager;
pub use sandbox::{Sandbox, SandboxConfig, TeardownReport};
