//! # attractor-store
//!
//! The on-disk run-state artifacts (C5) and the read-side snapshot reducer
//! (C8). Every write goes through [`atomic::write_atomic`] or
//! [`atomic::create_new`] so a reader never observes a torn file; the
//! scheduler is the sole writer of checkpoint/live/progress/final/pid, while
//! this crate's [`snapshot::load_snapshot`] and the supervisor only read.

pub mod atomic;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use snapshot::{load_snapshot, RunState, Snapshot};
pub use store::RunStore;
pub use types::{CheckpointState, FinalOutcome, Manifest, ProgressEvent, StopRequest, TerminalStatus};
