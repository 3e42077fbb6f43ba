//! The graph model (C1): nodes, edges, attributes, and reverse indices.
//!
//! A [`Graph`] is a directed, attributed multigraph. Nodes and edges preserve
//! insertion order so that iteration — and therefore routing — is
//! deterministic. The model carries no execution behavior; it is pure data
//! that the scheduler, validator, and condition evaluator all read.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Identifier type for nodes. Ids are opaque strings chosen by the graph
/// author (typically the DOT source); Attractor itself never parses them.
pub type NodeId = String;

/// The conventional name of the implicit/explicit start node.
pub const START: &str = "start";

/// The shape of a node, as declared by the graph source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeShape {
    /// Marks the single entry point of the graph.
    StartMarker,
    /// Marks a terminal node; at least one must exist.
    ExitMarker,
    /// An LLM-driven or otherwise stateful work unit.
    Action,
    /// A deterministic branch point with no side effects of its own.
    Conditional,
    /// A subprocess/tool invocation.
    Tool,
}

/// A node in the pipeline graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub shape: NodeShape,
    /// String attributes declared on the node (`llm_provider`, `tool_command`,
    /// `max_retries`, `prompt_file`, ...). Order is preserved for stable
    /// diagnostics and serialization but lookups are by key.
    pub attrs: IndexMap<String, String>,
    /// Subgraph/cluster labels the node was declared under, innermost last.
    pub classes: Vec<String>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, shape: NodeShape) -> Self {
        Self {
            id: id.into(),
            shape,
            attrs: IndexMap::new(),
            classes: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    /// Looks up an attribute, falling back to `default` when unset.
    pub fn attr<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.attrs.get(key).map(|s| s.as_str()).unwrap_or(default)
    }

    pub fn attr_bool(&self, key: &str, default: bool) -> bool {
        self.attrs
            .get(key)
            .map(|v| matches!(v.as_str(), "true" | "1" | "yes"))
            .unwrap_or(default)
    }
}

/// A directed edge between two nodes, carrying routing attributes.
///
/// The `condition` attribute (if present) is the raw, unparsed guard
/// expression; [`crate::condition`] compiles it lazily and caches the
/// compiled form so the scheduler's hot path never re-parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub attrs: IndexMap<String, String>,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            attrs: IndexMap::new(),
        }
    }

    pub fn with_condition(mut self, expr: impl Into<String>) -> Self {
        self.attrs.insert("condition".to_string(), expr.into());
        self
    }

    pub fn condition(&self) -> &str {
        self.attrs.get("condition").map(|s| s.as_str()).unwrap_or("")
    }

    /// `loop_restart=true` marks a back-edge that re-enters prior work.
    pub fn is_loop_restart(&self) -> bool {
        matches!(self.attrs.get("loop_restart").map(|s| s.as_str()), Some("true"))
    }

    pub fn fidelity(&self) -> &str {
        self.attrs.get("fidelity").map(|s| s.as_str()).unwrap_or("")
    }
}

/// The pipeline graph: nodes, edges, and reverse (incoming) indices.
///
/// All lookups (`outgoing`, `incoming`, `attr`) are constant-time amortized,
/// backed by `HashMap`s built once at insertion time rather than recomputed
/// per call. `incoming` is rebuilt from `edges` on deserialization (see
/// `GraphData` below) since it is not itself part of the wire shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphData")]
pub struct Graph {
    pub nodes: IndexMap<NodeId, Node>,
    /// Outgoing edges keyed by source id, in declaration order.
    pub edges: HashMap<NodeId, Vec<Edge>>,
    /// Graph-level attributes (e.g. `retry_target`, `fallback_retry_target`).
    pub attrs: IndexMap<String, String>,
    #[serde(skip)]
    incoming: HashMap<NodeId, Vec<Edge>>,
}

/// The wire shape of a [`Graph`]: everything but the `incoming` index, which
/// is derived rather than serialized. Deserializing through this shadow type
/// (via `#[serde(from = "GraphData")]`) guarantees `incoming` is always
/// rebuilt, so a `Graph` read back from JSON is just as queryable as one
/// built through `add_edge`.
#[derive(Debug, Deserialize)]
struct GraphData {
    nodes: IndexMap<NodeId, Node>,
    edges: HashMap<NodeId, Vec<Edge>>,
    #[serde(default)]
    attrs: IndexMap<String, String>,
}

impl From<GraphData> for Graph {
    fn from(data: GraphData) -> Self {
        let mut graph = Graph {
            nodes: data.nodes,
            edges: data.edges,
            attrs: data.attrs,
            incoming: HashMap::new(),
        };
        graph.rebuild_incoming();
        graph
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node. Returns an error if the id is already present.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(CoreError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Registers an edge. Parallel edges between the same pair of nodes are
    /// permitted (they typically carry distinct `condition` guards).
    pub fn add_edge(&mut self, edge: Edge) {
        self.incoming.entry(edge.to.clone()).or_default().push(edge.clone());
        self.edges.entry(edge.from.clone()).or_default().push(edge);
    }

    pub fn outgoing(&self, id: &str) -> &[Edge] {
        self.edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Incoming edges for `id`, in the order they were added. Backed by the
    /// `incoming` index built at insertion time, not recomputed per call.
    pub fn incoming(&self, id: &str) -> &[Edge] {
        self.incoming.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns true if `id` has at least one incoming edge.
    pub fn has_incoming(&self, id: &str) -> bool {
        !self.incoming(id).is_empty()
    }

    fn rebuild_incoming(&mut self) {
        self.incoming.clear();
        for edges in self.edges.values() {
            for edge in edges {
                self.incoming.entry(edge.to.clone()).or_default().push(edge.clone());
            }
        }
    }

    pub fn attr<'a>(&'a self, node: &str, key: &str, default: &'a str) -> &'a str {
        self.nodes
            .get(node)
            .map(|n| n.attr(key, default))
            .unwrap_or(default)
    }

    pub fn start_nodes(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.shape == NodeShape::StartMarker || n.id == START)
            .collect()
    }

    pub fn exit_nodes(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.shape == NodeShape::ExitMarker)
            .collect()
    }

    /// Breadth-first reachability from the (single) start node. Used by the
    /// validator's `reachable` rule; returns an empty set if there is no
    /// unambiguous start.
    pub fn reachable_from_start(&self) -> HashSet<NodeId> {
        let starts = self.start_nodes();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for s in starts {
            if seen.insert(s.id.clone()) {
                queue.push_back(s.id.clone());
            }
        }
        while let Some(id) = queue.pop_front() {
            for edge in self.outgoing(&id) {
                if seen.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: &str, shape: NodeShape) -> Node {
        Node::new(id, shape)
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let mut g = Graph::new();
        g.add_node(n("a", NodeShape::Action)).unwrap();
        let err = g.add_node(n("a", NodeShape::Action)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateNode(id) if id == "a"));
    }

    #[test]
    fn preserves_parallel_edge_order() {
        let mut g = Graph::new();
        g.add_edge(Edge::new("a", "b").with_condition("outcome=success"));
        g.add_edge(Edge::new("a", "b").with_condition("outcome=fail"));
        g.add_edge(Edge::new("a", "c"));
        let out = g.outgoing("a");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].condition(), "outcome=success");
        assert_eq!(out[2].to, "c");
    }

    #[test]
    fn incoming_reflects_edges_added_via_add_edge() {
        let mut g = Graph::new();
        g.add_edge(Edge::new("a", "c"));
        g.add_edge(Edge::new("b", "c"));
        g.add_edge(Edge::new("a", "b"));
        assert_eq!(g.incoming("c").len(), 2);
        assert_eq!(g.incoming("c")[0].from, "a");
        assert_eq!(g.incoming("c")[1].from, "b");
        assert!(g.has_incoming("b"));
        assert!(!g.has_incoming("a"));
    }

    #[test]
    fn incoming_index_is_rebuilt_after_deserialization() {
        let mut g = Graph::new();
        g.add_node(n(START, NodeShape::StartMarker)).unwrap();
        g.add_node(n("mid", NodeShape::Action)).unwrap();
        g.add_edge(Edge::new(START, "mid"));

        let json = serde_json::to_string(&g).unwrap();
        let round_tripped: Graph = serde_json::from_str(&json).unwrap();
        assert!(round_tripped.has_incoming("mid"));
        assert!(!round_tripped.has_incoming(START));
        assert_eq!(round_tripped.incoming("mid")[0].from, START);
    }

    #[test]
    fn reachability_follows_outgoing_edges_only() {
        let mut g = Graph::new();
        g.add_node(n(START, NodeShape::StartMarker)).unwrap();
        g.add_node(n("mid", NodeShape::Action)).unwrap();
        g.add_node(n("orphan", NodeShape::Action)).unwrap();
        g.add_node(n("exit", NodeShape::ExitMarker)).unwrap();
        g.add_edge(Edge::new(START, "mid"));
        g.add_edge(Edge::new("mid", "exit"));

        let reachable = g.reachable_from_start();
        assert!(reachable.contains("mid"));
        assert!(reachable.contains("exit"));
        assert!(!reachable.contains("orphan"));
    }
}
