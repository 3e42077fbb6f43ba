//! The JSON shapes of every artifact written under `logs_root`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `manifest.json` — immutable run identity, written once at submit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    pub repo_root: String,
    pub base_commit: Option<String>,
    pub run_branch: Option<String>,
    pub logs_root: String,
    pub graph_name: String,
}

/// `checkpoint.json` — durable scheduler state, rewritten on every commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    pub current_node_id: Option<String>,
    /// Deduplicated, insertion-ordered, and bounded by the scheduler (oldest
    /// entries drop off once the configured cap is exceeded).
    pub completed_nodes: Vec<String>,
    pub node_retries: HashMap<String, u32>,
    pub git_commit_sha: Option<String>,
}

/// One line of `progress.ndjson`, and the verbatim contents of `live.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub ts: String,
    pub event: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(event: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            event: event.into(),
            run_id: run_id.into(),
            node_id: None,
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// `final.json` — the exactly-once terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalOutcome {
    pub timestamp: String,
    pub status: TerminalStatus,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_git_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cxdb_context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cxdb_head_turn_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Fail,
}

impl FinalOutcome {
    pub fn new(run_id: impl Into<String>, status: TerminalStatus) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status,
            run_id: run_id.into(),
            failure_reason: None,
            final_git_commit_sha: None,
            cxdb_context_id: None,
            cxdb_head_turn_id: None,
        }
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// `stop_request.json` — operator-issued stop intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub pid: i32,
    pub grace_ms: u64,
    pub force: bool,
}

impl StopRequest {
    pub fn new(pid: i32, grace_ms: u64, force: bool) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            run_id: None,
            pid,
            grace_ms,
            force,
        }
    }
}
