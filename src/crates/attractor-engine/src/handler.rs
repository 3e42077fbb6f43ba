//! The handler registry boundary: the scheduler owns no knowledge of
//! specific handler semantics. Concrete LLM/tool handlers are out of scope
//! for this engine; this module ships the trait plus two test doubles used
//! throughout the integration suite.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use attractor_core::{Context, Node, Outcome};

/// The node "kind" a handler is bound to, resolved from [`attractor_core::NodeShape`]
/// plus the `type` attribute (tool nodes may be declared either way).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    Exit,
    Action,
    Conditional,
    Tool,
}

/// `(ctx, node, context) -> (Outcome, err)`. Implementations
/// are expected to catch their own panics/errors and return them as a
/// `HandlerError`, which the scheduler converts into a deterministic-fail
/// `Outcome` at the attempt boundary rather than letting it
/// propagate out of the run loop.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, node: &Node, context: &Context) -> Result<Outcome, String>;
}

/// Maps resolved node kinds to the handler that executes them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

/// A handler that always succeeds immediately. Useful for start/exit markers
/// and for exercising the scheduler's routing logic without any external
/// side effects.
pub struct NullHandler;

#[async_trait]
impl NodeHandler for NullHandler {
    async fn handle(&self, _node: &Node, _context: &Context) -> Result<Outcome, String> {
        Ok(Outcome::success())
    }
}

/// A scripted handler for tests: returns a fixed sequence of outcomes,
/// advancing one entry per invocation and repeating the last entry once
/// exhausted.
pub struct ScriptedHandler {
    script: parking_lot::Mutex<Vec<Outcome>>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(script: Vec<Outcome>) -> Self {
        Self {
            script: parking_lot::Mutex::new(script),
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeHandler for ScriptedHandler {
    async fn handle(&self, _node: &Node, _context: &Context) -> Result<Outcome, String> {
        let script = self.script.lock();
        if script.is_empty() {
            return Ok(Outcome::success());
        }
        let idx = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            .min(script.len() - 1);
        Ok(script[idx.min(script.len() - 1)].clone())
    }
}
