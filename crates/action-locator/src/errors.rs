//! Error types for element location and actions

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a capability backend (driver, element source,
/// detector).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend does not implement the requested capability
    #[error("'{operation}' is not supported by backend '{backend}'")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("backend '{backend}' failed: {reason}")]
    Failed { backend: String, reason: String },

    #[error("backend timeout: {0}")]
    Timeout(String),
}

impl BackendError {
    pub fn unsupported(backend: impl Into<String>, operation: &'static str) -> Self {
        BackendError::Unsupported {
            backend: backend.into(),
            operation,
        }
    }

    pub fn failed(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Failed {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, BackendError::Unsupported { .. })
    }
}

/// Locator error enumeration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("invalid element descriptor: {0}")]
    InvalidElement(String),

    /// Index based lookup is not available for this element kind
    #[error("index based location is not supported for {kind} element '{element}'")]
    IndexUnsupported { element: String, kind: &'static str },

    #[error("element '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Error raised by a keyword action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Every location strategy failed for the element
    #[error("all strategies failed for '{element}' in '{action}': {}", describe_cause(.last))]
    StrategyExhausted {
        element: String,
        action: String,
        last: Option<BackendError>,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Failed(String),
}

fn describe_cause(last: &Option<BackendError>) -> String {
    match last {
        Some(err) => err.to_string(),
        None => "no strategy located the element".to_string(),
    }
}

impl ActionError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ActionError::InvalidArgument(reason.into())
    }

    /// Whether re-running the action may succeed.
    ///
    /// Capability gaps and malformed arguments fail the same way on every
    /// attempt; everything else is treated as a transient domain failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::Unsupported(_) | ActionError::InvalidArgument(_) => false,
            ActionError::Backend(err) => !err.is_unsupported(),
            ActionError::Locator(LocatorError::Backend(err)) => !err.is_unsupported(),
            ActionError::Locator(LocatorError::IndexUnsupported { .. })
            | ActionError::Locator(LocatorError::InvalidElement(_)) => false,
            ActionError::StrategyExhausted { last, .. } => {
                !last.as_ref().is_some_and(BackendError::is_unsupported)
            }
            _ => true,
        }
    }
}
