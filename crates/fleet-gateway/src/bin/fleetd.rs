//! Main binary for the gpufleet gateway daemon (fleetd)

use clap::Parser;
use fleet_gateway::{serve, GatewayConfig};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "GPU fleet gateway daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address override
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// HTTP port override
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// State snapshot path override
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = serve(config).await {
        error!(error = %err, "gateway exited with error");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> fleet_core::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load_from_file(path)?,
        None => GatewayConfig::load()?,
    };

    if let Some(bind) = &cli.bind {
        config.bind_address = bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(state) = &cli.state {
        config.state_path = Some(state.clone());
    }

    config.validate()?;
    Ok(config)
}
