use std::path::Path;

use clap::Subcommand;

use super::execute::{DryRunArgs, ExecuteArgs};

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Execute the test cases of a project folder
    Execute(ExecuteArgs),

    /// Check that every keyword of a project resolves, without acting
    DryRun(DryRunArgs),
}

impl Commands {
    /// Project folder the command works on.
    pub fn project(&self) -> &Path {
        match self {
            Commands::Execute(args) => &args.folder,
            Commands::DryRun(args) => &args.folder,
        }
    }
}
