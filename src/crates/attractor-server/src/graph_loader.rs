//! The graph-construction boundary: turning a submit request's
//! `dot_source`/`dot_source_path` plus `config_path` into an
//! [`attractor_core::Graph`] is DOT/config-format parsing, which is out of
//! scope for this engine. [`GraphLoader`] is the
//! seam a real DOT+TOML frontend plugs into, mirroring the
//! [`attractor_engine::NodeHandler`] boundary for node execution.

use std::sync::Arc;

use async_trait::async_trait;
use attractor_core::Graph;

use crate::error::Result;
use crate::routes::SubmitRequest;

#[async_trait]
pub trait GraphLoader: Send + Sync {
    async fn load(&self, request: &SubmitRequest) -> Result<Arc<Graph>>;
}

/// A loader for tests and local experimentation: resolves every submit
/// request to one fixed, pre-built graph regardless of `dot_source` /
/// `dot_source_path` / `config_path`, so the server's routing and run
/// lifecycle can be exercised without a DOT parser.
pub struct StaticGraphLoader {
    graph: Arc<Graph>,
}

impl StaticGraphLoader {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl GraphLoader for StaticGraphLoader {
    async fn load(&self, _request: &SubmitRequest) -> Result<Arc<Graph>> {
        Ok(self.graph.clone())
    }
}
