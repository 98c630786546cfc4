use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use optics_cli::config::default_global_path;
use optics_cli::{ConfigLoader, OpticsConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "optics.log";
const JSON_LOG_FILE: &str = "optics.json.log";

/// Keeps the non-blocking file writers flushing until dropped.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

pub fn init_logging(level: &str, debug: bool, config: &OpticsConfig) -> Result<LogGuards> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let mut guards = Vec::new();
    let needs_dir = config.file_log || config.json_log;
    let output_dir = config.output_dir();
    if needs_dir {
        fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create log directory {}", output_dir.display())
        })?;
    }

    let console = config
        .console
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    let file = if config.file_log {
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(&output_dir, LOG_FILE));
        guards.push(guard);
        Some(fmt::layer().with_ansi(false).with_writer(writer))
    } else {
        None
    };

    let json = if config.json_log {
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
            &output_dir,
            JSON_LOG_FILE,
        ));
        guards.push(guard);
        Some(fmt::layer().json().with_writer(writer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())))
        .with(console)
        .with(file)
        .with(json)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuards { _guards: guards })
}

/// Defaults, then `~/.optics/global_config.yaml`, then the project's
/// `config.yaml`, then `--config`, then `OPTICS__` environment overrides.
pub fn load_config(config_path: Option<&PathBuf>, project: &Path) -> Result<OpticsConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(global) = default_global_path() {
        loader = loader.with_file(global);
    }
    loader = loader.with_project(project);
    if let Some(path) = config_path {
        loader = loader.with_required_file(path);
    }
    loader
        .with_env(std::env::vars())
        .load()
        .with_context(|| format!("Failed to load configuration for {}", project.display()))
}
