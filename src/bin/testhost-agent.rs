//! Sandbox agent
//!
//! Started by `ProcessHost` as the execution context of one sandbox. Builds
//! its dependency resolver from the setup messages on stdin and exits when
//! stdin closes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use testhost::host::{ControlMessage, ENV_APPLICATION_BASE, ENV_CACHE_PATH, ENV_DOMAIN_NAME};
use testhost::sandbox::DependencyResolver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("testhost=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let name = std::env::var(ENV_DOMAIN_NAME).context("Not started by a test host")?;
    info!(
        "Agent {} starting (base: {:?}, cache: {:?})",
        name,
        std::env::var_os(ENV_APPLICATION_BASE),
        std::env::var_os(ENV_CACHE_PATH)
    );

    let mut resolver = DependencyResolver::new();
    let mut data: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ControlMessage>(&line) {
            Ok(ControlMessage::Resolver(registration)) => {
                resolver = DependencyResolver::from_registration(&registration);
                info!(
                    "Resolver installed: {} files, {} directories",
                    resolver.files().len(),
                    resolver.directories().len()
                );
                for file in &registration.files {
                    if let Some(stem) = file.file_stem().and_then(|stem| stem.to_str()) {
                        debug!("{} resolves to {:?}", stem, resolver.resolve(stem));
                    }
                }
            }
            Ok(ControlMessage::Data { key, value }) => {
                debug!("Received data {}", key);
                data.insert(key, value);
            }
            Err(e) => warn!("Ignoring malformed control message: {}", e),
        }
    }

    info!("Agent {} exiting ({} data entries)", name, data.len());
    Ok(())
}
