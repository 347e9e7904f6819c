//! Example tool process exposing the `math` toolset.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use toolforest::client::FileRegistryStore;
use toolforest::config::{ServerSettings, load_server_settings};
use toolforest::primitives::ToolProcessDescriptor;
use toolforest::runtime::{DispatchOptions, HttpServer, RequestDispatcher};
use toolforest::telemetry::{self, TelemetryConfig};
use tracing::{info, warn};

mod tools;

#[derive(Parser, Debug)]
#[command(name = "math-toolset", version)]
#[command(about = "Example tool process exposing arithmetic tools")]
struct Cli {
    /// Server settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the toolset over HTTP until Ctrl-C
    Serve {
        /// Listener address, overriding settings
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// File registry root to publish the process descriptor into
        #[arg(long)]
        publish: Option<PathBuf>,
        /// Endpoint to advertise (default: http://<bound address>/)
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Dispatch one request envelope read from stdin
    Invoke,
    /// Print the toolset manifest
    Describe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&TelemetryConfig::default())?;

    let mut settings = load_server_settings(cli.config.as_deref())?;
    let dispatcher = Arc::new(RequestDispatcher::with_options(
        Arc::new(tools::registry()?),
        DispatchOptions::from(&settings),
    ));

    match cli.command {
        Commands::Serve {
            bind,
            publish,
            endpoint,
        } => {
            if let Some(bind) = bind {
                settings = settings.with_bind(bind);
            }
            serve(dispatcher, &settings, publish, endpoint).await
        }
        Commands::Invoke => invoke(&dispatcher).await,
        Commands::Describe => {
            let manifest = dispatcher.registry().manifest();
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
    }
}

async fn serve(
    dispatcher: Arc<RequestDispatcher>,
    settings: &ServerSettings,
    publish: Option<PathBuf>,
    endpoint: Option<String>,
) -> Result<()> {
    let registry = Arc::clone(dispatcher.registry());
    let server =
        HttpServer::bind(dispatcher, settings.bind())?.with_max_body_bytes(settings.max_body_bytes());
    let local_addr = server.local_addr();
    let endpoint = endpoint.unwrap_or_else(|| format!("http://{local_addr}/"));

    if let Some(root) = publish {
        let version = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?
            .as_secs();
        let descriptor = ToolProcessDescriptor::builder(settings.environment()?)
            .name(registry.toolset())?
            .endpoint(endpoint.as_str())?
            .version(version)
            .manifest_marker(registry.manifest().manifest_version)
            .build()?;
        let path = FileRegistryStore::new(root).publish(&descriptor).await?;
        info!(path = %path.display(), key = %descriptor.key(), "published descriptor");
    }

    info!(%local_addr, %endpoint, tools = registry.len(), "serving toolset");
    server
        .serve_with_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "failed to listen for ctrl-c");
            }
        })
        .await?;
    info!("shut down");
    Ok(())
}

async fn invoke(dispatcher: &RequestDispatcher) -> Result<()> {
    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("failed to read request from stdin")?;

    let response = dispatcher.handle_bytes(&raw).await;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response)?;
    stdout.write_all(b"\n")?;
    Ok(())
}
