use anyhow::Result;
use clap::Parser;
use fleetbox::cli::{FleetAction, runtime};
use fleetbox::infra::config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fleetbox",
    about = "Distribui containers entre providers com pool limitado"
)]
struct Cli {
    /// Diretório de configuração (default: ~/.config/fleetbox)
    #[arg(long, env = "FLEETBOX_CONFIG_DIR", default_value_os_t = config::default_config_dir())]
    config_dir: std::path::PathBuf,

    #[command(subcommand)]
    command: FleetAction,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    runtime::run(cli.command, &cli.config_dir)
}
