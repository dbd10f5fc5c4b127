use anyhow::{Context, Result};
use tracing::{error, info};

use testhost::settings::{self, HostSettings};
use testhost::{DomainManager, TestPackage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("testhost=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let package_path = std::env::args()
        .nth(1)
        .context("Usage: testhost <package.toml|package.json>")?;

    let host_settings = HostSettings::load()?;
    settings::init_settings(host_settings)?;
    let host_settings = settings::get_settings();
    info!("Using agent {}", host_settings.agent_program.display());

    let package = TestPackage::from_file(&package_path)?;
    info!("Loaded test package {} from {}", package.name(), package_path);

    let manager = DomainManager::from_settings(host_settings)?;
    manager.initialize();

    let sandbox = manager.create_domain(&package).await?;
    info!("Sandbox {} is running, waiting for Ctrl-C", sandbox.name());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Stopping");
    let reports = manager.shutdown([sandbox]).await;
    for report in reports {
        info!(
            "Sandbox {} unloaded: {}",
            report.name, report.context_unloaded
        );
    }

    info!("Exiting");
    Ok(())
}
