//! The run engine (C6, C10): the attempt loop, retry policy, cycle breaker,
//! heartbeat scoping, fan-out/join, and the human-gate interviewer that
//! together advance a run's token through an `attractor_core::Graph`,
//! persisting progress through an `attractor_store::RunStore`.

pub mod cycle_breaker;
pub mod error;
pub mod fanout;
pub mod handler;
pub mod heartbeat;
pub mod interviewer;
pub mod retry;
pub mod scheduler;

pub use cycle_breaker::{canonicalize, CycleBreaker};
pub use error::{EngineError, Result};
pub use fanout::{parse_branches, run_fan_out, Branch};
pub use handler::{HandlerRegistry, NodeHandler, NodeKind, NullHandler, ScriptedHandler};
pub use heartbeat::AttemptScope;
pub use interviewer::{AnswerOutcome, Interviewer, Question};
pub use retry::{default_max_attempts, RetryPolicy};
pub use scheduler::{JoinPolicy, Scheduler, SchedulerConfig};
