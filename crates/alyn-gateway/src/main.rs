//! Alyn gateway binary: loads config, wires the orchestrator together,
//! and serves the inbound HTTP surface.

mod app;
mod events;
mod http;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use alyn_core::AlynConfig;

#[derive(Parser, Debug)]
#[command(name = "alyn-gateway", about = "Alyn personal assistant orchestrator")]
struct Cli {
    /// Path to alyn.toml. Defaults to ./alyn.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| {
        let default = PathBuf::from("alyn.toml");
        default.exists().then_some(default)
    });

    let mut config = AlynConfig::load(config_path.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    app::run(config).await
}
