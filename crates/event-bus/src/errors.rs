//! Error types for the event bus

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// The receiving side of a queue is gone
    #[error("{0} queue is closed")]
    Closed(&'static str),

    /// A subscriber rejected an event
    #[error("subscriber '{id}' failed: {reason}")]
    Subscriber { id: String, reason: String },

    /// A call marshalled onto the bus thread did not complete in time
    #[error("bus bridge call '{operation}' timed out after {timeout:?}")]
    BridgeTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The bus thread could not be started or has already exited
    #[error("bus bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("event sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BusError {
    pub fn subscriber(id: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Subscriber {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
