//! Concrete node handlers the CLI wires into `attractor-engine`'s
//! [`HandlerRegistry`]. The engine itself stays ignorant of tool/LLM
//! semantics; this module is the seam where a real deployment plugs in.

use std::process::Stdio;

use async_trait::async_trait;
use attractor_core::{Context, Node, Outcome};
use attractor_engine::NodeHandler;
use tokio::process::Command;

/// Runs a tool node's `tool_command` attribute through the system shell.
///
/// If the subprocess's stdout parses as a JSON outcome payload (the
/// `decode_outcome` dialect), that outcome is used verbatim — this lets a
/// tool express retryable/deterministic failures, `context_updates`, and a
/// `preferred_label` instead of collapsing to a bare exit code. Otherwise
/// the exit status alone decides: `0` is `success`, anything else is a
/// deterministic `fail` carrying stderr as the reason.
///
/// Sandboxing the subprocess (seccomp, containers, resource limits) is
/// explicitly out of scope; the command runs with the CLI process's own
/// privileges and working directory.
pub struct ShellToolHandler;

#[async_trait]
impl NodeHandler for ShellToolHandler {
    async fn handle(&self, node: &Node, _context: &Context) -> Result<Outcome, String> {
        let command = node.attr("tool_command", "");
        if command.is_empty() {
            return Err("tool node missing tool_command".to_string());
        }

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to spawn tool_command '{command}': {e}"))?;

        if let Ok(outcome) = attractor_core::decode_outcome(&output.stdout) {
            return Ok(outcome);
        }

        if output.status.success() {
            Ok(Outcome::success())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = if stderr.trim().is_empty() {
                format!("tool_command exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            let mut outcome = Outcome::fail(reason);
            outcome.failure_class = Some(attractor_core::FailureClass::Deterministic);
            Ok(outcome)
        }
    }
}

/// A deterministic stand-in for an `action` node's real LLM provider call,
/// enabled by `--allow-test-shim`. Mirrors the submission server's
/// `allow_test_shim` request flag: it lets a pipeline be exercised end to
/// end without a live model, always reporting success and echoing the
/// node's `prompt`/`prompt_file` attribute into `context_updates` so
/// downstream conditions have something to route on.
pub struct EchoActionHandler;

#[async_trait]
impl NodeHandler for EchoActionHandler {
    async fn handle(&self, node: &Node, _context: &Context) -> Result<Outcome, String> {
        let mut outcome = Outcome::success();
        let prompt = node.attr("prompt", node.attr("prompt_file", ""));
        outcome
            .context_updates
            .insert(format!("{}.echo", node.id), serde_json::Value::String(prompt.to_string()));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attractor_core::NodeShape;

    #[tokio::test]
    async fn shell_tool_handler_maps_exit_zero_to_success() {
        let node = Node::new("t", NodeShape::Tool).with_attr("tool_command", "exit 0");
        let outcome = ShellToolHandler.handle(&node, &Context::new()).await.unwrap();
        assert_eq!(outcome.status, attractor_core::Status::Success);
    }

    #[tokio::test]
    async fn shell_tool_handler_maps_nonzero_exit_to_deterministic_fail() {
        let node = Node::new("t", NodeShape::Tool).with_attr("tool_command", "echo boom 1>&2; exit 7");
        let outcome = ShellToolHandler.handle(&node, &Context::new()).await.unwrap();
        assert_eq!(outcome.status, attractor_core::Status::Fail);
        assert_eq!(outcome.failure_reason.as_deref(), Some("boom"));
        assert_eq!(outcome.failure_class, Some(attractor_core::FailureClass::Deterministic));
    }

    #[tokio::test]
    async fn shell_tool_handler_honors_structured_json_outcome_on_stdout() {
        let node = Node::new("t", NodeShape::Tool)
            .with_attr("tool_command", r#"echo '{"status":"retry","failure_reason":"net blip"}'"#);
        let outcome = ShellToolHandler.handle(&node, &Context::new()).await.unwrap();
        assert_eq!(outcome.status, attractor_core::Status::Retry);
        assert_eq!(outcome.failure_reason.as_deref(), Some("net blip"));
    }

    #[tokio::test]
    async fn echo_action_handler_always_succeeds_and_echoes_prompt() {
        let node = Node::new("a", NodeShape::Action).with_attr("prompt", "say hi");
        let outcome = EchoActionHandler.handle(&node, &Context::new()).await.unwrap();
        assert_eq!(outcome.status, attractor_core::Status::Success);
        assert_eq!(
            outcome.context_updates.get("a.echo"),
            Some(&serde_json::Value::String("say hi".to_string()))
        );
    }
}
