//! # GoCart Gateway - Main Entry Point
//!
//! Loads configuration, builds the pipeline, and serves until SIGINT or
//! SIGTERM. Configuration comes from `GATEWAY_CONFIG_PATH` (YAML) when set,
//! from `config/gateway.yaml` when that file exists, and from defaults plus
//! environment variables otherwise, which is how the container deployments
//! run.

use tracing::info;

use gocart_gateway::core::config::GatewayConfig;
use gocart_gateway::gateway::GatewayServer;
use gocart_gateway::observability::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    info!("🚀 Starting GoCart gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config().await?;
    info!(
        "📋 Configuration loaded: {} upstreams, listening on {}:{}",
        config.upstreams.len(),
        config.server.bind_address,
        config.server.port
    );

    let server = GatewayServer::from_config(config)?;
    server.start().await?;

    Ok(())
}

async fn load_config() -> anyhow::Result<GatewayConfig> {
    if let Ok(path) = std::env::var("GATEWAY_CONFIG_PATH") {
        info!("📄 Loading configuration from {}", path);
        return Ok(GatewayConfig::load_from_file(&path).await?);
    }

    let default_path = "config/gateway.yaml";
    if tokio::fs::try_exists(default_path).await.unwrap_or(false) {
        info!("📄 Loading configuration from {}", default_path);
        return Ok(GatewayConfig::load_from_file(default_path).await?);
    }

    info!("📄 No config file, using defaults with environment overrides");
    Ok(GatewayConfig::from_env()?)
}
