//! Error types for the supervisor's stop algorithm.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] attractor_store::StoreError),

    #[error("run is not in a running state (state: {0:?})")]
    NotRunning(attractor_store::RunState),

    #[error("run has no recorded pid")]
    MissingPid,

    #[error("run has no resolvable run_id")]
    MissingRunId,

    /// Any step that detects a PID whose identity no longer matches what was
    /// verified aborts the stop without signaling — the only defense against
    /// acting on a reused PID.
    #[error("process identity changed: {0}")]
    IdentityMismatch(String),

    #[error("failed to signal pid {pid}: {reason}")]
    Signal { pid: i32, reason: String },
}
