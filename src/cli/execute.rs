use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use optics_cli::{OpticsConfig, ProjectRun, Runner};
use optics_event_bus::{EventRecorder, JsonLinesSubscriber, SyncEventManager, TracingSubscriber};
use optics_flow::RunMode;
use tracing::info;

use super::context::CliContext;
use super::interactive;

#[derive(Args, Clone, Debug)]
pub struct ExecuteArgs {
    /// Project folder holding the suite files and config.yaml
    pub folder: PathBuf,

    /// Run only this test case (setup and teardown cases still run)
    #[arg(short, long)]
    pub test_name: Option<String>,

    /// Read pause/resume/skip/retry/add commands from stdin while running
    #[arg(short, long)]
    pub interactive: bool,
}

#[derive(Args, Clone, Debug)]
pub struct DryRunArgs {
    /// Project folder holding the suite files and config.yaml
    pub folder: PathBuf,

    /// Check only this test case (setup and teardown cases still run)
    #[arg(short, long)]
    pub test_name: Option<String>,
}

pub async fn cmd_execute(args: ExecuteArgs, ctx: &CliContext) -> Result<()> {
    let run = ProjectRun::new(args.folder, RunMode::Batch).with_test_case(args.test_name);
    run_project(ctx, run, args.interactive).await
}

pub async fn cmd_dry_run(args: DryRunArgs, ctx: &CliContext) -> Result<()> {
    let run = ProjectRun::new(args.folder, RunMode::DryRun).with_test_case(args.test_name);
    run_project(ctx, run, false).await
}

/// Start the bus thread and attach the stock subscribers.
fn open_bus(config: &OpticsConfig) -> Result<(Arc<SyncEventManager>, Arc<EventRecorder>)> {
    let bus = Arc::new(
        SyncEventManager::new(config.execution.bridge_timeout())
            .context("Failed to start event bus")?,
    );

    bus.subscribe("tracing", Arc::new(TracingSubscriber))?;
    let recorder = Arc::new(EventRecorder::new());
    bus.subscribe("recorder", recorder.clone())?;
    if config.json_log {
        let path = config.events_path();
        let sink = JsonLinesSubscriber::create(&path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;
        bus.subscribe("json_lines", Arc::new(sink))?;
        info!("Writing execution events to: {}", path.display());
    }
    Ok((bus, recorder))
}

async fn run_project(ctx: &CliContext, run: ProjectRun, interactive: bool) -> Result<()> {
    let config = ctx.shared_config();
    let (bus, recorder) = tokio::task::spawn_blocking(move || open_bus(&config))
        .await
        .context("Event bus setup did not complete")??;

    if interactive {
        interactive::spawn_controller(Arc::clone(&bus))
            .context("Failed to start the console controller")?;
        eprintln!("{}", interactive::HELP);
    }

    let runner = Runner::new(ctx.shared_config(), ctx.registry().clone(), bus);
    let report = runner
        .run(&run)
        .await
        .with_context(|| format!("{} of {} failed", run.mode, run.folder.display()))?;

    println!("{}", report.summary);
    println!("events:     {}", recorder.len());

    if report.is_success() {
        Ok(())
    } else {
        bail!(
            "{} node(s) did not pass in {}",
            report.summary.failures.len() + report.summary.unfinished,
            run.folder.display()
        )
    }
}
