use super::env::CliArgs;
use super::execute::{cmd_dry_run, cmd_execute};
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Execute(args) => cmd_execute(args, ctx).await,
        Commands::DryRun(args) => cmd_dry_run(args, ctx).await,
    }
}
