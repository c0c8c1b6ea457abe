//! Error types for the mutation protocol.

use thiserror::Error;

/// Errors that can occur in optimistic mutation flows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// The network call backing a mutation failed.
    #[error("mutation rejected: {0}")]
    Rejected(String),

    /// A dependent action referenced a client id that was never registered.
    #[error("unknown client id: {0}")]
    UnknownClient(String),

    /// A pending mutation was dropped without settling.
    #[error("pending mutation dropped without settlement")]
    Closed,
}
