//! Error types for the binding layer.
//!
//! Fetch failures are never errors here: they live in the cache entry and
//! reach consumers through the derived status. The types below cover the
//! runtime itself and the one opt-in path for exception-style handling,
//! [`MutationError`], returned by `MutationHandle::unwrap`.

use thiserror::Error;

/// Errors raised by the runtime, the store interface, or configuration.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to serialize argument for endpoint `{endpoint}`: {source}")]
    KeySerialization {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot flush effects while an evaluation pass is active")]
    FlushDuringPass,

    #[error("effect flush is already in progress")]
    ReentrantFlush,

    #[error("invalid hook configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BindError>;

/// Outcome of awaiting a mutation through its handle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MutationError<E> {
    /// The store settled the request with an error.
    #[error("mutation was rejected")]
    Rejected(E),

    /// The request was dropped before it settled.
    #[error("mutation was abandoned before it settled")]
    Abandoned,
}

impl<E> MutationError<E> {
    /// The rejection payload, if the store produced one.
    pub fn into_rejection(self) -> Option<E> {
        match self {
            MutationError::Rejected(error) => Some(error),
            MutationError::Abandoned => None,
        }
    }
}
