//! Sandbox creation
//!
//! Resolves the configuration, creates the context through an
//! `ExecutionHost`, installs the dependency resolver and hands down the
//! add-in registry. Creation either yields a usable `Sandbox` or leaves
//! nothing behind.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::addins::{ExtensionRegistry, ADDINS_DIR, ADDIN_REGISTRY_KEY};
use super::cache::resolve_cache_root;
use super::config::{self, SandboxConfig};
use super::resolver::ResolverRegistration;
use super::teardown::reclaim_cache_dir;
use crate::core::error::{Result, SandboxError};
use crate::core::package::TestPackage;
use crate::host::{ExecutionContext, ExecutionHost, TrustDescriptor};
use crate::manager::NameLease;
use crate::settings::{running_in_sandbox, HostSettings};

/// Prefix of every sandbox name
pub const DOMAIN_PREFIX: &str = "domain-";

/// Name of the sandbox created for `package`
pub fn sandbox_name(package: &TestPackage) -> String {
    format!("{}{}", DOMAIN_PREFIX, package.name())
}

/// Options fixed for the lifetime of a factory
#[derive(Debug, Clone)]
pub struct FactoryOptions {
    /// Root under which cache directories are allocated
    pub cache_root: PathBuf,
    /// Runtime libraries registered with every resolver
    pub core_libraries: Vec<PathBuf>,
    /// Add-in directory registered with every resolver
    pub addins_dir: PathBuf,
    /// Registry handed down to top-level sandboxes
    pub addin_registry: ExtensionRegistry,
    /// Set when this process is itself running inside a sandbox; nested
    /// sandboxes then start without add-ins.
    pub in_sandbox: bool,
}

impl FactoryOptions {
    /// Derive options from settings and the running executable
    pub fn from_settings(settings: &HostSettings) -> anyhow::Result<Self> {
        let exe = std::env::current_exe()?;
        let exe_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow::anyhow!("Executable {} has no parent", exe.display()))?;

        let core_libraries = if settings.core_libraries.is_empty() {
            vec![exe.clone()]
        } else {
            settings.core_libraries.clone()
        };

        let addins_dir = exe_dir.join(ADDINS_DIR);
        let addin_registry = ExtensionRegistry::scan(&addins_dir)?;

        Ok(Self {
            cache_root: resolve_cache_root(settings.shadow_files_path.as_deref()),
            core_libraries,
            addins_dir,
            addin_registry,
            in_sandbox: running_in_sandbox(),
        })
    }
}

/// A live sandbox. Owned by its creator until handed to `teardown::unload`.
pub struct Sandbox {
    pub(crate) name: String,
    pub(crate) config: SandboxConfig,
    pub(crate) context: Option<Box<dyn ExecutionContext>>,
    /// Captured at creation; read again at teardown
    pub(crate) copy_on_load: bool,
    /// Name reservation held for a `DomainManager`
    pub(crate) lease: Option<NameLease>,
}

impl Sandbox {
    pub(crate) fn new(
        name: String,
        config: SandboxConfig,
        context: Box<dyn ExecutionContext>,
    ) -> Self {
        Self {
            copy_on_load: config.copy_on_load,
            name,
            config,
            context: Some(context),
            lease: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn copy_on_load(&self) -> bool {
        self.copy_on_load
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.config.cache_path.as_deref()
    }

    /// The execution context, for running tests inside the sandbox
    pub fn context_mut(&mut self) -> Option<&mut (dyn ExecutionContext + 'static)> {
        self.context.as_deref_mut()
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("copy_on_load", &self.copy_on_load)
            .field("loaded", &self.context.is_some())
            .finish()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.context.is_some() {
            warn!(
                "Sandbox {} dropped without unload; cache directory {:?} is orphaned",
                self.name, self.config.cache_path
            );
        }
    }
}

/// Creates sandboxes through an `ExecutionHost`
pub struct SandboxFactory {
    host: Arc<dyn ExecutionHost>,
    options: FactoryOptions,
}

impl SandboxFactory {
    pub fn new(host: Arc<dyn ExecutionHost>, options: FactoryOptions) -> Self {
        Self { host, options }
    }

    pub fn options(&self) -> &FactoryOptions {
        &self.options
    }

    /// Registration every resolver receives
    pub fn resolver_registration(&self) -> ResolverRegistration {
        let mut registration = ResolverRegistration::default();
        for library in &self.options.core_libraries {
            registration.add_file(library);
        }
        registration.add_directory(&self.options.addins_dir);
        registration
    }

    /// Create and populate a sandbox for `package`
    pub async fn create(&self, package: &TestPackage, trust: &TrustDescriptor) -> Result<Sandbox> {
        let config = config::build(package, &self.options.cache_root)?;
        let name = sandbox_name(package);

        let mut context = match self.host.create_context(&name, &config, trust).await {
            Ok(context) => context,
            Err(source) => {
                error!("Failed to create sandbox {}: {:#}", name, source);
                discard_cache(&config).await;
                return Err(SandboxError::ContextCreation { name, source });
            }
        };

        let registration = self.resolver_registration();
        if let Err(source) = context.install_resolver(&registration).await {
            error!("Failed to install resolver into {}: {:#}", name, source);
            if let Err(err) = context.unload().await {
                error!("Unable to unload sandbox {}: {:#}", name, err);
            }
            discard_cache(&config).await;
            return Err(SandboxError::ResolverInstall { name, source });
        }

        // Only pass the registry down one level so that nested sandboxes
        // start without add-ins.
        if self.options.in_sandbox {
            debug!("Running inside a sandbox; {} gets no add-in registry", name);
        } else {
            match serde_json::to_value(&self.options.addin_registry) {
                Ok(value) => {
                    if let Err(err) = context.set_data(ADDIN_REGISTRY_KEY, value).await {
                        warn!("Failed to pass add-in registry to {}: {:#}", name, err);
                    }
                }
                Err(err) => warn!("Failed to encode add-in registry: {}", err),
            }
        }

        info!(
            "Created sandbox {} via {} (base: {}, copy on load: {})",
            name,
            self.host.name(),
            config.base_path.display(),
            config.copy_on_load
        );

        Ok(Sandbox::new(name, config, context))
    }
}

async fn discard_cache(config: &SandboxConfig) {
    if let Some(cache_path) = &config.cache_path {
        let report = reclaim_cache_dir(cache_path.clone()).await;
        if !report.is_complete() {
            warn!(
                "Cache directory {} of failed sandbox was not fully removed",
                cache_path.display()
            );
        }
    }
}
