//! Chat server entry point

use anyhow::{Context, Result};
use chat_config::ChatConfig;
use chat_gateway::ChatServer;
use chat_grains::ChatCluster;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address (overrides the configuration file)
    #[arg(long)]
    bind_address: Option<String>,

    /// Port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ChatConfig::load(args.config.as_deref())?;
    if let Some(bind_address) = args.bind_address {
        config.server.bind_address = bind_address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json |= args.json_logs;
    config.validate()?;

    init_logging(&config.logging.level, config.logging.json);

    info!("Starting chat server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let cluster = ChatCluster::new(&config).context("Failed to start actor cluster")?;
    let server = ChatServer::bind(&config, cluster.clone())
        .await
        .context("Failed to bind WebSocket listener")?;

    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!("Failed to listen for CTRL+C: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    if let Err(e) = server.serve(shutdown_signal).await {
        error!("Chat server error: {}", e);
    }

    info!("Shutting down actor cluster");
    if !cluster.shutdown().await {
        warn!("Some actors did not deactivate before the shutdown timeout");
    }

    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
