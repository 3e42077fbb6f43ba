//! Shared application state: the run registry, handler/graph-loading
//! boundaries, and where each run's artifacts live on disk.

use std::path::PathBuf;
use std::sync::Arc;

use attractor_engine::{HandlerRegistry, Scheduler};
use attractor_store::RunStore;
use dashmap::DashMap;

use crate::broadcaster::RunBroadcaster;
use crate::graph_loader::GraphLoader;

/// Everything the server knows about one accepted run.
pub struct RunHandle {
    pub run_id: String,
    pub logs_root: PathBuf,
    pub store: Arc<RunStore>,
    pub scheduler: Arc<Scheduler>,
    pub broadcaster: Arc<RunBroadcaster>,
}

#[derive(Clone)]
pub struct AppState {
    pub runs: Arc<DashMap<String, Arc<RunHandle>>>,
    pub registry: Arc<HandlerRegistry>,
    pub graph_loader: Arc<dyn GraphLoader>,
    /// Parent directory under which each run gets its own `logs_root`
    /// subdirectory named after its `run_id`.
    pub logs_root: PathBuf,
    pub scheduler_config: attractor_engine::SchedulerConfig,
}

impl AppState {
    pub fn new(
        logs_root: PathBuf,
        registry: Arc<HandlerRegistry>,
        graph_loader: Arc<dyn GraphLoader>,
    ) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            registry,
            graph_loader,
            logs_root,
            scheduler_config: attractor_engine::SchedulerConfig::default(),
        }
    }

    pub fn run_logs_root(&self, run_id: &str) -> PathBuf {
        self.logs_root.join(run_id)
    }
}
