// dao_insure - main.rs
// Loads configuration, installs the tracing subscriber and dispatches the CLI.

use clap::Parser;
use dao_insure::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli::load(&cli)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    cli::run(cli, config)
}
