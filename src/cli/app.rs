use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let config = load_config(cli.config.as_ref(), cli.command.project())?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level).to_string();
    let _log_guards = init_logging(&level, cli.debug, &config)?;

    info!("Starting Optics v{}", env!("CARGO_PKG_VERSION"));

    let cli_context = CliContext::new(config);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
