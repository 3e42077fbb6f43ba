//! Error types for graph construction, condition parsing, and validation.

use thiserror::Error;

use crate::validator::Diagnostic;

/// Convenience result type using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building, parsing, or validating a pipeline graph.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A node id was registered twice.
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// An edge referenced a node id that does not exist in the graph.
    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    /// A condition expression used a reserved operator (`<`, `>`, `|`).
    #[error("reserved operator '{0}' is not permitted in edge conditions")]
    ReservedOperator(String),

    /// A condition expression could not be parsed.
    #[error("failed to parse condition '{expr}': {reason}")]
    ConditionParse { expr: String, reason: String },

    /// Graph failed static validation; carries every `ERROR`-severity diagnostic.
    #[error("graph failed validation with {} error(s)", .0.len())]
    Validation(Vec<Diagnostic>),

    /// An outcome payload was missing a required field for its status.
    #[error("outcome decode failed: {0}")]
    OutcomeDecode(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
