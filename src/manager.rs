//! Domain manager service
//!
//! Owns the factory and keeps track of every live sandbox it created, so
//! names stay unique and shutdown can account for what is still loaded.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::core::error::{Result, SandboxError};
use crate::core::package::TestPackage;
use crate::host::{ExecutionHost, ProcessHost, TrustDescriptor};
use crate::sandbox::factory::{sandbox_name, FactoryOptions, Sandbox, SandboxFactory};
use crate::sandbox::teardown::{self, TeardownReport};
use crate::settings::HostSettings;

type LiveNames = Arc<Mutex<BTreeSet<String>>>;

pub struct DomainManager {
    factory: SandboxFactory,
    live: LiveNames,
}

/// Keeps a sandbox name reserved until dropped
pub(crate) struct NameLease {
    live: LiveNames,
    name: String,
}

impl Drop for NameLease {
    fn drop(&mut self) {
        lock(&self.live).remove(&self.name);
    }
}

fn lock(live: &Mutex<BTreeSet<String>>) -> MutexGuard<'_, BTreeSet<String>> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DomainManager {
    pub fn new(host: Arc<dyn ExecutionHost>, options: FactoryOptions) -> Self {
        Self {
            factory: SandboxFactory::new(host, options),
            live: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Manager backed by agent processes, configured from `settings`
    pub fn from_settings(settings: &HostSettings) -> anyhow::Result<Self> {
        let host = ProcessHost::from_settings(settings);
        let options = FactoryOptions::from_settings(settings)?;
        Ok(Self::new(Arc::new(host), options))
    }

    pub fn initialize(&self) {
        let options = self.factory.options();
        info!(
            "Domain manager ready (cache root: {}, add-ins: {}, nested: {})",
            options.cache_root.display(),
            options.addin_registry.addins().len(),
            options.in_sandbox
        );
    }

    pub fn cache_root(&self) -> &Path {
        &self.factory.options().cache_root
    }

    /// Create a sandbox inheriting this process's environment
    pub async fn create_domain(&self, package: &TestPackage) -> Result<Sandbox> {
        self.create_domain_with_trust(package, &TrustDescriptor::inherit())
            .await
    }

    pub async fn create_domain_with_trust(
        &self,
        package: &TestPackage,
        trust: &TrustDescriptor,
    ) -> Result<Sandbox> {
        let name = sandbox_name(package);
        if !lock(&self.live).insert(name.clone()) {
            return Err(SandboxError::NameInUse(name));
        }
        // Released on failure, on cancellation, or when the sandbox goes away
        let lease = NameLease {
            live: self.live.clone(),
            name,
        };

        let mut sandbox = self.factory.create(package, trust).await?;
        sandbox.lease = Some(lease);
        Ok(sandbox)
    }

    /// Unload a sandbox. Never fails; see `TeardownReport` for the outcome.
    ///
    /// The name is free for reuse afterwards, even if the context was orphaned.
    pub async fn unload(&self, sandbox: Sandbox) -> TeardownReport {
        teardown::unload(sandbox).await
    }

    /// Names of sandboxes created and not yet unloaded
    pub fn live_domains(&self) -> Vec<String> {
        lock(&self.live).iter().cloned().collect()
    }

    /// Unload every sandbox handed back, then warn about any still held
    /// elsewhere.
    pub async fn shutdown(
        &self,
        sandboxes: impl IntoIterator<Item = Sandbox>,
    ) -> Vec<TeardownReport> {
        let mut reports = Vec::new();
        for sandbox in sandboxes {
            reports.push(self.unload(sandbox).await);
        }

        let remaining = self.live_domains();
        if !remaining.is_empty() {
            warn!("Shutting down with sandboxes still loaded: {:?}", remaining);
        }
        reports
    }
}
