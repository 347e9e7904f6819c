//! Post-deploy smoke check: discover the `math` toolset and add two numbers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use toolforest::client::{
    DiscoveryConfig, DiscoveryRegistry, FileRegistryStore, HttpTransport, InvocationClient,
    ProxyFactory,
};
use toolforest::config::load_client_settings;
use toolforest::telemetry::{self, TelemetryConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "smoke-invoke", version)]
#[command(about = "Call math.add through discovery and fail unless it returns 42")]
struct Cli {
    /// Client settings file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Qualified tool name to call
    #[arg(long, default_value = "math.add")]
    tool: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&TelemetryConfig::default())?;

    let settings = load_client_settings(cli.config.as_deref())?;
    let environment = settings.environment()?;

    let store = Arc::new(FileRegistryStore::new(settings.registry_root()));
    let discovery = DiscoveryRegistry::new(store, DiscoveryConfig::from(&settings))?;
    let descriptors = discovery.list(&environment).await?;
    info!(%environment, processes = descriptors.len(), "discovered tool processes");

    let client = InvocationClient::from_settings(Arc::new(HttpTransport::new()), &settings);
    let catalog = ProxyFactory::new(Arc::new(client))
        .build_all(&descriptors)
        .await;
    for (key, err) in catalog.failures() {
        warn!(%key, %err, "process unavailable");
    }

    let Some(stub) = catalog.get(&cli.tool) else {
        bail!("{} not found in the {environment} registry", cli.tool);
    };
    let result = stub
        .call(json!({"x": 2, "y": 40}))
        .await
        .with_context(|| format!("calling {}", cli.tool))?;
    println!("{result}");

    if result["value"].as_f64() != Some(42.0) {
        bail!("unexpected result from {}: {result}", cli.tool);
    }
    Ok(())
}
