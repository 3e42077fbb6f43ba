//! Loads a graph for the `run`/`serve` subcommands from a JSON file. DOT
//! parsing is out of scope for this engine; JSON is this binary's concrete
//! stand-in since `attractor_core::Graph` already round-trips through serde.

use std::path::Path;
use std::sync::Arc;

use attractor_core::{validate_or_error, Graph};

use crate::error::{CliError, Result};

pub fn load_graph(path: &Path) -> Result<Arc<Graph>> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::GraphRead {
        path: path.display().to_string(),
        source,
    })?;
    let graph: Graph = serde_json::from_str(&content).map_err(|source| CliError::GraphParse {
        path: path.display().to_string(),
        source,
    })?;
    validate_or_error(&graph)?;
    Ok(Arc::new(graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_graph_that_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(&path, r#"{"nodes":{},"edges":{},"attrs":{}}"#).unwrap();
        let err = load_graph(&path).unwrap_err();
        assert!(matches!(err, CliError::Core(_)));
    }

    #[test]
    fn loads_a_minimal_valid_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let json = serde_json::json!({
            "nodes": {
                "start": {"id": "start", "shape": "start_marker", "attrs": {}, "classes": []},
                "t": {"id": "t", "shape": "tool", "attrs": {"tool_command": "exit 0"}, "classes": []},
                "exit": {"id": "exit", "shape": "exit_marker", "attrs": {}, "classes": []},
            },
            "edges": {
                "start": [{"from": "start", "to": "t", "attrs": {}}],
                "t": [{"from": "t", "to": "exit", "attrs": {}}],
            },
            "attrs": {},
        });
        std::fs::write(&path, json.to_string()).unwrap();
        let graph = load_graph(&path).unwrap();
        assert_eq!(graph.nodes.len(), 3);
    }
}
