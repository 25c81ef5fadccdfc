//! Multi-tenant MCP gateway
//!
//! Serves every server configured in the TOML file under
//! `/proxy/{server}/mcp`.

use std::path::PathBuf;

use clap::Parser;
use mcp_gateway::config::GatewayConfig;

#[derive(Parser, Debug)]
#[command(name = "mcp-gateway")]
#[command(about = "Multi-tenant MCP gateway", long_about = None)]
struct Args {
    /// Configuration file (TOML). Without it, defaults plus environment are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("mcp_gateway={}", args.log_level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::from_env()?,
    };

    if config.unprotected {
        tracing::warn!("Running UNPROTECTED: authentication and scope checks are disabled");
    }
    tracing::info!(
        tenants = config.seed.tenants.len(),
        servers = config.seed.servers.len(),
        tools = config.seed.tools.len(),
        "Configuration loaded"
    );

    config
        .transport()?
        .serve(&config.listen_addr, shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
