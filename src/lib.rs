//! Optics CLI library
//!
//! Configuration loading, backend sessions, the YAML suite reader and the
//! project runner used by the `optics` binary. Embedders register their
//! backends in a [`BackendRegistry`] and drive a [`Runner`] the same way.

pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod runner;
pub mod session;
pub mod suite_reader;

pub use config::{BackendKind, ConfigLoader, DependencyConfig, ExecutionSettings, OpticsConfig};
pub use diagnostics::ScreenshotSink;
pub use errors::{ConfigError, RunError, SessionError, SuiteError};
pub use runner::{ProjectRun, Runner};
pub use session::{BackendRegistry, Session};
