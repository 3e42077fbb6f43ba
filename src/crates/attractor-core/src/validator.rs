//! Static lints over a compiled graph (C3): structural, semantic, and
//! routing rules. Rules are pluggable — built-ins run first, then any
//! caller-supplied `extra_rules`, mirroring a handler-registry-aware rule
//! such as `type_known`.

use serde::{Deserialize, Serialize};

use crate::condition::CompiledExpr;
use crate::error::{CoreError, Result};
use crate::graph::{Graph, NodeShape, START};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Locator {
    Node(String),
    Edge(String, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub rule_id: String,
    pub locator: Option<Locator>,
    pub message: String,
    pub fix_hint: Option<String>,
}

impl Diagnostic {
    fn error(rule_id: &str, locator: Option<Locator>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            rule_id: rule_id.to_string(),
            locator,
            message: message.into(),
            fix_hint: None,
        }
    }

    fn warning(rule_id: &str, locator: Option<Locator>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            rule_id: rule_id.to_string(),
            locator,
            message: message.into(),
            fix_hint: None,
        }
    }

    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// A pluggable validation rule. Built-ins implement this trait; callers may
/// supply their own (e.g. a `type_known` rule parameterized by the handler
/// registry) via [`validate`]'s `extra_rules` parameter.
pub trait ValidationRule {
    fn check(&self, graph: &Graph) -> Vec<Diagnostic>;
}

/// Runs the mandatory rule set, then any `extra_rules`, and returns every
/// diagnostic in rule-declaration order.
pub fn validate(graph: &Graph, extra_rules: &[Box<dyn ValidationRule>]) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    out.extend(rule_exactly_one_start(graph));
    out.extend(rule_at_least_one_exit(graph));
    out.extend(rule_start_no_incoming(graph));
    out.extend(rule_exits_no_outgoing(graph));
    out.extend(rule_edge_endpoints_exist(graph));
    out.extend(rule_reachability(graph));
    out.extend(rule_conditions_parse(graph));
    out.extend(rule_action_has_provider(graph));
    out.extend(rule_tool_has_command(graph));
    out.extend(rule_prompt_exclusive(graph));
    out.extend(rule_goal_gate_retry_target(graph));
    out.extend(rule_loop_restart_guard(graph));
    out.extend(rule_fanout_fallback(graph));
    for rule in extra_rules {
        out.extend(rule.check(graph));
    }
    out
}

/// Runs [`validate`] and collapses every `ERROR`-severity diagnostic into a
/// single [`CoreError::Validation`].
pub fn validate_or_error(graph: &Graph) -> Result<()> {
    let diags = validate(graph, &[]);
    let errors: Vec<_> = diags.into_iter().filter(|d| d.severity == Severity::Error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(errors))
    }
}

fn rule_exactly_one_start(graph: &Graph) -> Vec<Diagnostic> {
    let starts = graph.start_nodes();
    if starts.len() == 1 {
        return Vec::new();
    }
    vec![Diagnostic::error(
        "exactly_one_start",
        None,
        format!("expected exactly one start node, found {}", starts.len()),
    )]
}

fn rule_at_least_one_exit(graph: &Graph) -> Vec<Diagnostic> {
    if graph.exit_nodes().is_empty() {
        vec![Diagnostic::error("at_least_one_exit", None, "graph has no exit node")]
    } else {
        Vec::new()
    }
}

fn rule_start_no_incoming(graph: &Graph) -> Vec<Diagnostic> {
    graph
        .start_nodes()
        .into_iter()
        .filter(|n| graph.has_incoming(&n.id))
        .map(|n| {
            Diagnostic::error(
                "start_no_incoming",
                Some(Locator::Node(n.id.clone())),
                format!("start node '{}' has incoming edges", n.id),
            )
        })
        .collect()
}

fn rule_exits_no_outgoing(graph: &Graph) -> Vec<Diagnostic> {
    graph
        .exit_nodes()
        .into_iter()
        .filter(|n| !graph.outgoing(&n.id).is_empty())
        .map(|n| {
            Diagnostic::error(
                "exit_no_outgoing",
                Some(Locator::Node(n.id.clone())),
                format!("exit node '{}' has outgoing edges", n.id),
            )
        })
        .collect()
}

fn rule_edge_endpoints_exist(graph: &Graph) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for edges in graph.edges.values() {
        for edge in edges {
            if edge.from != START && !graph.nodes.contains_key(&edge.from) {
                out.push(Diagnostic::error(
                    "edge_endpoints_exist",
                    Some(Locator::Edge(edge.from.clone(), edge.to.clone())),
                    format!("edge source '{}' does not exist", edge.from),
                ));
            }
            if !graph.nodes.contains_key(&edge.to) {
                out.push(Diagnostic::error(
                    "edge_endpoints_exist",
                    Some(Locator::Edge(edge.from.clone(), edge.to.clone())),
                    format!("edge target '{}' does not exist", edge.to),
                ));
            }
        }
    }
    out
}

fn rule_reachability(graph: &Graph) -> Vec<Diagnostic> {
    let reachable = graph.reachable_from_start();
    graph
        .nodes
        .values()
        .filter(|n| !reachable.contains(&n.id))
        .map(|n| {
            Diagnostic::error(
                "reachable_from_start",
                Some(Locator::Node(n.id.clone())),
                format!("node '{}' is not reachable from start", n.id),
            )
        })
        .collect()
}

fn rule_conditions_parse(graph: &Graph) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for edges in graph.edges.values() {
        for edge in edges {
            if let Err(e) = CompiledExpr::parse(edge.condition()) {
                out.push(Diagnostic::error(
                    "condition_parses",
                    Some(Locator::Edge(edge.from.clone(), edge.to.clone())),
                    format!("edge condition '{}' does not parse: {e}", edge.condition()),
                ));
            }
        }
    }
    out
}

fn rule_action_has_provider(graph: &Graph) -> Vec<Diagnostic> {
    graph
        .nodes
        .values()
        .filter(|n| n.shape == NodeShape::Action && !n.attrs.contains_key("llm_provider"))
        .map(|n| {
            Diagnostic::error(
                "action_has_provider",
                Some(Locator::Node(n.id.clone())),
                format!("action node '{}' is missing llm_provider (no auto-detection)", n.id),
            )
        })
        .collect()
}

fn rule_tool_has_command(graph: &Graph) -> Vec<Diagnostic> {
    graph
        .nodes
        .values()
        .filter(|n| {
            (n.shape == NodeShape::Tool || n.attr("type", "") == "tool")
                && n.attr("tool_command", "").is_empty()
        })
        .map(|n| {
            Diagnostic::error(
                "tool_has_command",
                Some(Locator::Node(n.id.clone())),
                format!("tool node '{}' is missing a non-empty tool_command", n.id),
            )
        })
        .collect()
}

fn rule_prompt_exclusive(graph: &Graph) -> Vec<Diagnostic> {
    graph
        .nodes
        .values()
        .filter(|n| !n.attr("prompt_file", "").is_empty() && !n.attr("prompt", "").is_empty())
        .map(|n| {
            Diagnostic::error(
                "prompt_exclusive",
                Some(Locator::Node(n.id.clone())),
                format!("node '{}' sets both prompt_file and inline prompt", n.id),
            )
        })
        .collect()
}

fn rule_goal_gate_retry_target(graph: &Graph) -> Vec<Diagnostic> {
    graph
        .nodes
        .values()
        .filter(|n| n.classes.iter().any(|c| c == "goal_gate") && n.attr("retry_target", "").is_empty())
        .map(|n| {
            Diagnostic::warning(
                "goal_gate_retry_target",
                Some(Locator::Node(n.id.clone())),
                format!("goal_gate node '{}' should declare a retry_target", n.id),
            )
        })
        .collect()
}

fn rule_loop_restart_guard(graph: &Graph) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for edges in graph.edges.values() {
        for edge in edges {
            if !edge.is_loop_restart() {
                continue;
            }
            let guards_transient = edge.condition().contains("context.failure_class=transient_infra");
            if !guards_transient {
                out.push(Diagnostic::warning(
                    "loop_restart_guard",
                    Some(Locator::Edge(edge.from.clone(), edge.to.clone())),
                    "loop_restart=true edge should guard on context.failure_class=transient_infra",
                ));
                continue;
            }
            let has_companion = graph
                .outgoing(&edge.from)
                .iter()
                .any(|other| !other.is_loop_restart() && other.to != edge.to);
            if !has_companion {
                out.push(Diagnostic::warning(
                    "loop_restart_guard",
                    Some(Locator::Edge(edge.from.clone(), edge.to.clone())),
                    "loop_restart edge has no companion edge for deterministic failures",
                ));
            }
        }
    }
    out
}

fn rule_fanout_fallback(graph: &Graph) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for (from, edges) in &graph.edges {
        if edges.len() < 2 {
            continue;
        }
        let has_fallback = edges.iter().any(|e| e.condition().is_empty());
        if !has_fallback {
            out.push(Diagnostic::warning(
                "fanout_fallback",
                Some(Locator::Node(from.clone())),
                format!("node '{from}' has conditional-only fan-out without an unconditional fallback"),
            ));
        }
    }
    out
}
