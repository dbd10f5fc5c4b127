//! Sandbox teardown
//!
//! Unloading never fails from the caller's point of view. A context that
//! refuses to die is left orphaned and logged; a cache directory that cannot
//! be fully removed is logged and left behind.

use std::path::PathBuf;

use tracing::{error, info, warn};

use super::cache::{delete_tree, CleanupReport};
use super::factory::Sandbox;

/// What happened while unloading a sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub name: String,
    /// False when the context could not be destroyed and is orphaned
    pub context_unloaded: bool,
    /// Present when a cache directory was reclaimed
    pub cache_cleanup: Option<CleanupReport>,
}

/// Unload `sandbox` and reclaim its cache directory
pub async fn unload(mut sandbox: Sandbox) -> TeardownReport {
    // Read from the captured fields: the context may not be queryable once
    // destruction starts.
    let name = sandbox.name.clone();
    let copy_on_load = sandbox.copy_on_load;
    let cache_path = sandbox.config.cache_path.clone();

    let Some(context) = sandbox.context.take() else {
        warn!("Sandbox {} has no execution context", name);
        return TeardownReport {
            name,
            context_unloaded: false,
            cache_cleanup: None,
        };
    };

    if let Err(err) = context.unload().await {
        // Assume the tests did something bad and leave the orphaned context
        // behind. Its cache directory may still be in use.
        error!("Unable to unload sandbox {}: {:#}", name, err);
        return TeardownReport {
            name,
            context_unloaded: false,
            cache_cleanup: None,
        };
    }

    let cache_cleanup = match cache_path {
        Some(cache_path) if copy_on_load => {
            let report = reclaim_cache_dir(cache_path.clone()).await;
            if !report.is_complete() {
                warn!(
                    "Cache directory {} of sandbox {} left with {} undeletable entries",
                    cache_path.display(),
                    name,
                    report.failures
                );
            }
            Some(report)
        }
        _ => None,
    };

    info!("Unloaded sandbox {}", name);
    TeardownReport {
        name,
        context_unloaded: true,
        cache_cleanup,
    }
}

/// Delete a cache directory off the async runtime
pub(crate) async fn reclaim_cache_dir(path: PathBuf) -> CleanupReport {
    let shown = path.display().to_string();
    match tokio::task::spawn_blocking(move || delete_tree(&path)).await {
        Ok(report) => report,
        Err(err) => {
            error!("Cache cleanup of {} did not complete: {}", shown, err);
            CleanupReport {
                failures: 1,
                ..CleanupReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TrustDescriptor;
    use crate::sandbox::factory::tests::{options_for, RecordingHost};
    use crate::sandbox::factory::SandboxFactory;
    use crate::TestPackage;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create(
        host: Arc<RecordingHost>,
        cache_root: &Path,
        package: &TestPackage,
    ) -> Sandbox {
        SandboxFactory::new(host, options_for(cache_root, false))
            .create(package, &TrustDescriptor::empty())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unload_reclaims_cache() {
        let cache_root = TempDir::new().unwrap();
        let host = Arc::new(RecordingHost::default());
        let package = TestPackage::new("/t/Foo.dll");
        let sandbox = create(host.clone(), cache_root.path(), &package).await;

        let cache_path = sandbox.cache_path().unwrap().to_path_buf();
        std::fs::create_dir_all(cache_path.join("assembly").join("dl3")).unwrap();
        let copied = cache_path.join("assembly").join("dl3").join("Foo.dll");
        std::fs::write(copied, b"copy").unwrap();

        let report = unload(sandbox).await;

        assert!(report.context_unloaded);
        let cleanup = report.cache_cleanup.unwrap();
        assert!(cleanup.is_complete());
        assert_eq!(cleanup.files_removed, 1);
        assert!(!cache_path.exists());
        assert_eq!(
            *host.journal.unloaded.lock().unwrap(),
            vec!["domain-Foo.dll".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_unload_is_absorbed() {
        let cache_root = TempDir::new().unwrap();
        let host = Arc::new(RecordingHost::default());
        host.fail_unload.store(true, Ordering::SeqCst);
        let package = TestPackage::new("/t/Foo.dll");
        let sandbox = create(host.clone(), cache_root.path(), &package).await;
        let cache_path = sandbox.cache_path().unwrap().to_path_buf();

        let report = unload(sandbox).await;

        assert!(!report.context_unloaded);
        assert_eq!(report.cache_cleanup, None);
        // The orphaned context may still be using it
        assert!(cache_path.exists());
    }

    #[tokio::test]
    async fn test_unload_without_copy_on_load_leaves_no_cache_work() {
        let cache_root = TempDir::new().unwrap();
        let host = Arc::new(RecordingHost::default());
        let package = TestPackage::new("/t/Foo.dll")
            .with_setting(crate::core::package::SHADOW_COPY_FILES, false);
        let sandbox = create(host, cache_root.path(), &package).await;

        let report = unload(sandbox).await;

        assert!(report.context_unloaded);
        assert_eq!(report.cache_cleanup, None);
    }

    #[tokio::test]
    async fn test_missing_cache_dir_is_not_an_error() {
        let cache_root = TempDir::new().unwrap();
        let host = Arc::new(RecordingHost::default());
        let sandbox = create(host, cache_root.path(), &TestPackage::new("/t/Foo.dll")).await;
        std::fs::remove_dir(sandbox.cache_path().unwrap()).unwrap();

        let report = unload(sandbox).await;

        assert!(report.context_unloaded);
        assert_eq!(report.cache_cleanup, Some(CleanupReport::default()));
    }
}
