//! # devicekit-sim: device runtime simulator
//!
//! Composition root that wires the in-memory host and the virtual drivers
//! together and runs a pairing scenario.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the tracing subscriber
//! - Load the app manifest and hand it to the driver manager
//! - Register the virtual integration's drivers and initialise them
//! - Run the scenario and log what happened
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;
mod scenario;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use devicekit_adapter_virtual::VirtualIntegration;
use devicekit_app::host::InMemoryHost;
use devicekit_app::manager::DriverManager;
use devicekit_domain::manifest::AppManifest;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let manifest_json = std::fs::read_to_string(&config.app.manifest)
        .with_context(|| format!("failed to read manifest {}", config.app.manifest))?;
    let manifest = AppManifest::from_json(&manifest_json).context("invalid app manifest")?;
    tracing::info!(app = %manifest.id, drivers = manifest.drivers.len(), "manifest loaded");

    let host = Arc::new(InMemoryHost::new().with_latency(config.host_latency()));
    let mut manager = DriverManager::new(manifest, Arc::clone(&host));
    let integration = VirtualIntegration::default().with_debounce(config.debounce());
    integration.register(&mut manager)?;
    manager.init_all().await;

    let report = scenario::run(&manager, &integration, &config.scenario).await?;
    tracing::info!(
        paired = report.paired,
        accepted = report.accepted,
        rejected = report.rejected,
        transmissions = report.transmissions,
        persisted = host.records().len(),
        "scenario finished"
    );

    for record in host.records() {
        tracing::info!(
            device = %record.app_id,
            driver = %record.driver_id,
            name = %record.descriptor.name,
            state = %serde_json::Value::Object(record.state.into_iter().collect()),
            "persisted"
        );
    }
    Ok(())
}
