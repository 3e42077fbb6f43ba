//! Builds the [`HandlerRegistry`] this binary runs graphs with: `start`/
//! `exit`/`conditional` markers never do real work, `tool` nodes shell out,
//! and `action` nodes either run the echo shim or refuse, since a real LLM
//! provider adapter is out of scope for this engine.

use std::sync::Arc;

use attractor_engine::{HandlerRegistry, NodeKind, NodeHandler, NullHandler};
use async_trait::async_trait;
use attractor_core::{Context, Node, Outcome};

use crate::handlers::{EchoActionHandler, ShellToolHandler};

/// Returned for `action` nodes when `--allow-test-shim` was not passed: a
/// clear, deterministic failure rather than a silent no-op, so a pipeline
/// that actually needs an LLM provider fails loudly instead of "succeeding"
/// without having done anything.
struct UnconfiguredActionHandler;

#[async_trait]
impl NodeHandler for UnconfiguredActionHandler {
    async fn handle(&self, node: &Node, _context: &Context) -> Result<Outcome, String> {
        Err(format!(
            "action node '{}' has no configured LLM provider; pass --allow-test-shim to run with the echo shim",
            node.id
        ))
    }
}

pub fn build_registry(allow_test_shim: bool) -> Arc<HandlerRegistry> {
    let action_handler: Arc<dyn NodeHandler> = if allow_test_shim {
        Arc::new(EchoActionHandler)
    } else {
        Arc::new(UnconfiguredActionHandler)
    };

    Arc::new(
        HandlerRegistry::new()
            .register(NodeKind::Start, Arc::new(NullHandler))
            .register(NodeKind::Exit, Arc::new(NullHandler))
            .register(NodeKind::Conditional, Arc::new(NullHandler))
            .register(NodeKind::Tool, Arc::new(ShellToolHandler))
            .register(NodeKind::Action, action_handler),
    )
}
