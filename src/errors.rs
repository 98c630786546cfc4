//! Error types for configuration, sessions and suite loading

use std::path::PathBuf;

use optics_event_bus::BusError;
use optics_flow::FlowError;
use optics_locator::BackendError;
use thiserror::Error;

/// Configuration loading and validation errors. All of them are fatal
/// before any test case starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid environment override {key}: {reason}")]
    EnvOverride { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ConfigError::Invalid(reason.into())
    }
}

/// Session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A backend is enabled in configuration but nothing can build it
    #[error("Configuration error: no {kind} backend registered under '{name}'")]
    UnknownBackend { kind: &'static str, name: String },

    #[error("Failed to start {kind} backend '{name}': {source}")]
    Backend {
        kind: &'static str,
        name: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors reading a project's suite files
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid suite file {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Missing required content in {folder}: {missing}")]
    MissingContent { folder: PathBuf, missing: String },

    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl SuiteError {
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SuiteError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors of a whole project run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Suite(#[from] SuiteError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Bus(#[from] BusError),
}
