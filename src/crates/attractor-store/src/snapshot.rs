//! The run-state snapshot reader (C8): a read-side reducer over the store's
//! artifacts, used by the CLI `status` command, the supervisor's pre-check,
//! and the submission server. Holds no write capability.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::RunStore;
use crate::types::TerminalStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Unknown,
    Running,
    Success,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub run_id: Option<String>,
    pub logs_root: String,
    pub state: RunState,
    pub current_node_id: Option<String>,
    pub last_event: Option<String>,
    pub last_event_at: Option<String>,
    pub failure_reason: Option<String>,
    pub pid: Option<i32>,
    pub pid_alive: bool,
}

/// Three-step resolution order: `final.json`
/// is authoritative when present; otherwise `live.json` with a fallback to
/// the last parseable NDJSON line; then the pid file refines `unknown` into
/// `running` when the process is alive.
pub fn load_snapshot(store: &RunStore) -> Result<Snapshot> {
    let logs_root = store.logs_root().display().to_string();

    if let Some(final_outcome) = store.load_final()? {
        let pid = store.read_pid().ok().flatten();
        return Ok(Snapshot {
            run_id: Some(final_outcome.run_id),
            logs_root,
            state: match final_outcome.status {
                TerminalStatus::Success => RunState::Success,
                TerminalStatus::Fail => RunState::Fail,
            },
            current_node_id: None,
            last_event: None,
            last_event_at: Some(final_outcome.timestamp),
            failure_reason: final_outcome.failure_reason,
            pid,
            pid_alive: false,
        });
    }

    let event = match store.load_live()? {
        Some(e) => Some(e),
        None => store.load_last_progress_line()?,
    };

    let mut snapshot = Snapshot {
        run_id: event.as_ref().map(|e| e.run_id.clone()),
        logs_root,
        state: RunState::Unknown,
        current_node_id: event.as_ref().and_then(|e| e.node_id.clone()),
        last_event: event.as_ref().map(|e| e.event.clone()),
        last_event_at: event.as_ref().map(|e| e.ts.clone()),
        failure_reason: None,
        pid: None,
        pid_alive: false,
    };

    match store.read_pid()? {
        Some(pid) => {
            snapshot.pid = Some(pid);
            snapshot.pid_alive = pid_is_alive(pid);
            if snapshot.pid_alive {
                snapshot.state = RunState::Running;
            }
        }
        None => {
            snapshot.state = RunState::Unknown;
        }
    }

    Ok(snapshot)
}

#[cfg(unix)]
fn pid_is_alive(pid: i32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: i32) -> bool {
    false
}
