//! # attractor-core
//!
//! The graph model, edge-condition language, and static validator that every
//! other Attractor crate builds on. This crate performs no I/O: it is pure
//! data plus pure functions over that data, so it can be unit-tested and
//! fuzzed in isolation from the scheduler, the on-disk run store, and the
//! submission server.

pub mod condition;
pub mod context;
pub mod error;
pub mod graph;
pub mod status;
pub mod validator;

pub use condition::{CompiledExpr, EvalContext};
pub use context::Context;
pub use error::{CoreError, Result};
pub use graph::{Edge, Graph, Node, NodeId, NodeShape, START};
pub use status::{decode_outcome, FailureClass, Outcome, Status};
pub use validator::{validate, validate_or_error, Diagnostic, Severity};
