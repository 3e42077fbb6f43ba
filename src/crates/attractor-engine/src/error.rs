//! Error types for the scheduler and interviewer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] attractor_core::CoreError),

    #[error(transparent)]
    Store(#[from] attractor_store::StoreError),

    #[error("no outgoing edge matched at node '{0}'")]
    NoMatchingEdge(String),

    #[error("handler returned an error for node '{node}': {error}")]
    HandlerFailed { node: String, error: String },

    #[error("run was cancelled")]
    Cancelled,

    #[error("cycle breaker tripped at node '{node}' for signature '{signature}'")]
    CycleBroken { node: String, signature: String },

    #[error("invariant violation: {0}")]
    FatalInternal(String),
}
