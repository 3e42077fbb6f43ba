//! The run-state store (C5): the single-writer, many-reader home for every
//! artifact under one run's `logs_root`.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::atomic::{append_line, create_new, write_atomic};
use crate::error::Result;
use crate::types::{CheckpointState, FinalOutcome, Manifest, ProgressEvent, StopRequest};

/// Owns every artifact for one run. The scheduler holds the only `RunStore`
/// for a given `logs_root`; the supervisor, snapshot reader, and SSE replay
/// buffer only ever read through [`crate::snapshot`] or the raw files.
pub struct RunStore {
    logs_root: PathBuf,
    progress_lock: Mutex<()>,
}

impl RunStore {
    /// Opens (creating if absent) the run-state directory rooted at
    /// `logs_root`.
    pub fn open(logs_root: impl Into<PathBuf>) -> Result<Self> {
        let logs_root = logs_root.into();
        std::fs::create_dir_all(&logs_root)
            .map_err(|e| crate::error::StoreError::io(logs_root.display().to_string(), e))?;
        Ok(Self {
            logs_root,
            progress_lock: Mutex::new(()),
        })
    }

    pub fn logs_root(&self) -> &Path {
        &self.logs_root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.logs_root.join(name)
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        write_atomic(&self.path("manifest.json"), serde_json::to_string_pretty(manifest)?.as_bytes())
    }

    pub fn load_manifest(&self) -> Result<Option<Manifest>> {
        self.load_json("manifest.json")
    }

    pub fn save_checkpoint(&self, state: &CheckpointState) -> Result<()> {
        write_atomic(&self.path("checkpoint.json"), serde_json::to_string_pretty(state)?.as_bytes())
    }

    pub fn load_checkpoint(&self) -> Result<Option<CheckpointState>> {
        self.load_json("checkpoint.json")
    }

    /// Appends `event` to `progress.ndjson` and overwrites `live.json` with
    /// the same payload, both under one lock so the NDJSON file never
    /// observes interleaved partial lines and `live.json` always reflects a
    /// monotonic suffix of what was appended.
    pub fn emit_progress(&self, event: &ProgressEvent) -> Result<()> {
        let _guard = self.progress_lock.lock();
        let line = serde_json::to_string(event)?;
        append_line(&self.path("progress.ndjson"), &line)?;
        write_atomic(&self.path("live.json"), line.as_bytes())?;
        tracing::event!(
            target: "attractor::progress",
            tracing::Level::INFO,
            run_id = %event.run_id,
            event = %event.event,
            node_id = event.node_id.as_deref().unwrap_or(""),
        );
        Ok(())
    }

    pub fn load_live(&self) -> Result<Option<ProgressEvent>> {
        self.load_json("live.json")
    }

    /// Returns the last parseable line of `progress.ndjson`, tolerating a
    /// concurrently-appended, possibly-truncated final line.
    pub fn load_last_progress_line(&self) -> Result<Option<ProgressEvent>> {
        let path = self.path("progress.ndjson");
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        for line in contents.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<ProgressEvent>(line) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Returns every parseable line of `progress.ndjson` in append order,
    /// silently skipping blank or malformed lines (a reader may race a
    /// concurrent append). Used by SSE history replay.
    pub fn load_all_progress(&self) -> Result<Vec<ProgressEvent>> {
        let path = self.path("progress.ndjson");
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Ok(Vec::new());
        };
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<ProgressEvent>(l).ok())
            .collect())
    }

    /// Idempotent: once `final.json` exists, subsequent calls are a no-op
    /// and report success, never overwriting the first terminal outcome.
    pub fn save_final(&self, outcome: &FinalOutcome) -> Result<bool> {
        create_new(&self.path("final.json"), serde_json::to_string_pretty(outcome)?.as_bytes())
    }

    pub fn load_final(&self) -> Result<Option<FinalOutcome>> {
        self.load_json("final.json")
    }

    pub fn write_pid(&self, pid: i32) -> Result<()> {
        write_atomic(&self.path("run.pid"), pid.to_string().as_bytes())
    }

    pub fn read_pid(&self) -> Result<Option<i32>> {
        match std::fs::read_to_string(self.path("run.pid")) {
            Ok(s) => Ok(s.trim().parse::<i32>().ok().filter(|p| *p > 0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::error::StoreError::io("run.pid", e)),
        }
    }

    pub fn write_stop_request(&self, request: &StopRequest) -> Result<()> {
        write_atomic(&self.path("stop_request.json"), serde_json::to_string_pretty(request)?.as_bytes())
    }

    pub fn load_stop_request(&self) -> Result<Option<StopRequest>> {
        self.load_json("stop_request.json")
    }

    /// Shared helper: readers tolerate missing files (absence, not error)
    /// and malformed JSON surfaces as `None` rather than a hard failure,
    /// since a reader may race a concurrent writer mid-update.
    fn load_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match std::fs::read(self.path(name)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::error::StoreError::io(name, e)),
        }
    }
}
