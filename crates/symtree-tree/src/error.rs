use thiserror::Error;

use crate::node::Direction;

/// Failures of tree operations. Each one is local to the tree and node it
/// names; none of them affect other trees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The server errored, timed out or returned nothing. The node stays
    /// collapsed and unresolved.
    #[error("failed to resolve {direction} symbols for `{symbol}`: {message}")]
    Resolution {
        symbol: String,
        direction: Direction,
        message: String,
    },
    /// Rejected before any state changed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// A closed or unknown tree, or a line outside the rendered buffer.
    #[error("not found: {0}")]
    NotFound(String),
}

impl TreeError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TreeError::Resolution { .. } => "resolution_failure",
            TreeError::InvalidOperation(_) => "invalid_operation",
            TreeError::NotFound(_) => "not_found",
        }
    }
}
