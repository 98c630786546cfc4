//! Flow execution error types

use optics_event_bus::BusError;
use optics_locator::ActionError;
use thiserror::Error;

use crate::model::NodeState;

/// Flow execution errors
#[derive(Debug, Error)]
pub enum FlowError {
    /// Missing or invalid setup; fatal before traversal begins
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A node kept failing until its attempt budget ran out
    #[error("{node} failed after {attempts} attempt(s): {last}")]
    RetryBudgetExceeded {
        node: String,
        attempts: u32,
        last: String,
    },

    #[error("Invalid transition for {node}: {from} -> {to}")]
    InvalidTransition {
        node: String,
        from: NodeState,
        to: NodeState,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    /// Invalid tree structure
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Keyword not found: {0}")]
    KeywordNotFound(String),

    /// The blocking bridge around a keyword call failed
    #[error("Keyword bridge error: {0}")]
    Bridge(String),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl FlowError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        FlowError::Configuration(reason.into())
    }

    /// Whether the error aborts a run before traversal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::Configuration(_) | FlowError::InvalidStructure(_) | FlowError::DuplicateNode(_)
        )
    }
}
