//! The stop algorithm: identity-verified signaling with
//! graceful→forced escalation. Implemented exactly once, used by both the
//! CLI `stop` subcommand and any future embedding.

use std::path::Path;
use std::time::Duration;

use attractor_store::{FinalOutcome, RunStore, StopRequest, TerminalStatus};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{Result, SupervisorError};
use crate::process_info::ProcessInfo;

/// What `stop` actually did, for the CLI to report and choose an exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub pid: i32,
    pub graceful: bool,
    pub forced: bool,
    pub synthesized_final: bool,
}

/// `stop(store, backend, self_exe, grace, force)`: verify identity, signal
/// gracefully, escalate to a forced kill if requested and still running.
///
/// Any PID identity mismatch detected at any step aborts the stop immediately
/// without sending a signal — this is the only protection against acting on
/// a PID that has been reused by an unrelated process since the run started.
pub async fn stop(
    store: &RunStore,
    backend: &dyn ProcessInfo,
    self_exe: &Path,
    grace: Duration,
    force: bool,
) -> Result<StopReport> {
    let snapshot = attractor_store::load_snapshot(store)?;
    if snapshot.state != attractor_store::RunState::Running {
        return Err(SupervisorError::NotRunning(snapshot.state));
    }
    let pid = snapshot.pid.ok_or(SupervisorError::MissingPid)?;
    let run_id = snapshot
        .run_id
        .clone()
        .or_else(|| store.load_manifest().ok().flatten().map(|m| m.run_id))
        .ok_or(SupervisorError::MissingRunId)?;
    let logs_root = store.logs_root();

    let start_time = verify_identity(backend, pid, &run_id, logs_root, self_exe)?;

    if let Err(e) = store.write_stop_request(&StopRequest::new(pid, grace.as_millis() as u64, force)) {
        // Best-effort: the signal is what actually stops the run, so a
        // failure to record intent does not abort.
        tracing::warn!(error = %e, pid, "failed to write stop_request.json");
    }

    // Re-verify immediately before signaling (step 4): the pre-check above
    // may be stale by the time we actually act on it.
    let reverified = verify_identity(backend, pid, &run_id, logs_root, self_exe)?;
    if reverified != start_time {
        return Err(SupervisorError::IdentityMismatch(
            "process identity changed between pre-check and signal".to_string(),
        ));
    }

    send_signal(pid, Signal::SIGTERM)?;
    let exited = poll_until_exit(backend, pid, start_time, grace).await?;

    if exited {
        let synthesized = ensure_final(store, &run_id, "stopped_by_operator")?;
        return Ok(StopReport { pid, graceful: true, forced: false, synthesized_final: synthesized });
    }

    if !force {
        return Ok(StopReport { pid, graceful: false, forced: false, synthesized_final: false });
    }

    let reverified = verify_identity(backend, pid, &run_id, logs_root, self_exe)?;
    if reverified != start_time {
        return Err(SupervisorError::IdentityMismatch(
            "process identity changed before forced signal".to_string(),
        ));
    }

    send_signal(pid, Signal::SIGKILL)?;
    let forced_grace = grace.min(Duration::from_secs(10)).max(Duration::from_secs(1));
    poll_until_exit(backend, pid, start_time, forced_grace).await?;

    let synthesized = ensure_final(store, &run_id, "stopped_by_operator_forced")?;
    Ok(StopReport { pid, graceful: false, forced: true, synthesized_final: synthesized })
}

/// Verifies that `pid` is alive and is, beyond reasonable doubt, the
/// scheduler process that owns `logs_root` / `run_id` — not an unrelated
/// process that has since reused the PID. Returns the start-time fingerprint
/// to be re-checked on every subsequent poll.
fn verify_identity(
    backend: &dyn ProcessInfo,
    pid: i32,
    expected_run_id: &str,
    expected_logs_root: &Path,
    self_exe: &Path,
) -> Result<u64> {
    if !backend.is_alive(pid) {
        return Err(SupervisorError::IdentityMismatch(format!("pid {pid} is not alive")));
    }

    if let Some(exe) = backend.exe_path(pid) {
        if exe != self_exe {
            return Err(SupervisorError::IdentityMismatch(format!(
                "executable path {} does not match supervisor's own {}",
                exe.display(),
                self_exe.display()
            )));
        }
    }

    let cmdline = backend
        .cmdline(pid)
        .ok_or_else(|| SupervisorError::IdentityMismatch(format!("cmdline unavailable for pid {pid}")))?;

    if !cmdline_is_attractor_run(&cmdline) {
        return Err(SupervisorError::IdentityMismatch(
            "cmdline does not contain an attractor run/resume invocation".to_string(),
        ));
    }

    if !cmdline_matches_run(&cmdline, expected_run_id, expected_logs_root) {
        return Err(SupervisorError::IdentityMismatch(
            "cmdline's --run-id/--logs-root does not match the expected run".to_string(),
        ));
    }

    backend
        .start_time(pid)
        .ok_or_else(|| SupervisorError::IdentityMismatch(format!("start time unavailable for pid {pid}")))
}

fn cmdline_is_attractor_run(cmdline: &[String]) -> bool {
    cmdline.windows(2).any(|w| {
        let subcommand_token = w[0].rsplit('/').next().unwrap_or(&w[0]);
        subcommand_token == "attractor" && (w[1] == "run" || w[1] == "resume")
    })
}

fn cmdline_matches_run(cmdline: &[String], run_id: &str, logs_root: &Path) -> bool {
    for pair in cmdline.windows(2) {
        match pair[0].as_str() {
            "--run-id" if pair[1] == run_id => return true,
            "--logs-root" if Path::new(&pair[1]) == logs_root => return true,
            _ => {}
        }
    }
    false
}

fn send_signal(pid: i32, signal: Signal) -> Result<()> {
    kill(Pid::from_raw(pid), signal).map_err(|e| SupervisorError::Signal { pid, reason: e.to_string() })
}

/// Polls with an adaptive interval clamped to [10ms, 100ms]
/// until `pid` exits or `timeout` elapses. Re-confirms the start time
/// on every poll; a mismatch means the PID has already been reused and the
/// poll aborts rather than reporting a false "exited".
async fn poll_until_exit(
    backend: &dyn ProcessInfo,
    pid: i32,
    expected_start_time: u64,
    timeout: Duration,
) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut interval = Duration::from_millis(10);

    loop {
        if !backend.is_alive(pid) {
            return Ok(true);
        }
        match backend.start_time(pid) {
            Some(st) if st == expected_start_time => {}
            _ => {
                return Err(SupervisorError::IdentityMismatch(
                    "process identity changed while polling for exit".to_string(),
                ))
            }
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = (interval * 2).min(Duration::from_millis(100));
    }
}

/// Synthesizes `final.json` with `status=fail` if the scheduler did not
/// write one itself. Returns whether this call actually wrote it (false if a
/// `final.json` — scheduler's or an earlier supervisor's — already existed).
fn ensure_final(store: &RunStore, run_id: &str, failure_reason: &str) -> Result<bool> {
    let outcome = FinalOutcome::new(run_id, TerminalStatus::Fail).with_failure_reason(failure_reason);
    Ok(store.save_final(&outcome)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_info::{FakeProcess, FakeProcessInfo};
    use attractor_store::{Manifest, ProgressEvent};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn self_exe() -> PathBuf {
        PathBuf::from("/usr/bin/attractor")
    }

    fn running_fixture(dir: &Path, pid: i32, start_time: u64) -> (RunStore, FakeProcessInfo) {
        let store = RunStore::open(dir).unwrap();
        store
            .save_manifest(&Manifest {
                run_id: "run-42".to_string(),
                repo_root: "/repo".to_string(),
                base_commit: None,
                run_branch: None,
                logs_root: dir.display().to_string(),
                graph_name: "g".to_string(),
            })
            .unwrap();
        store.write_pid(pid).unwrap();
        store
            .emit_progress(&ProgressEvent::new("stage_attempt_start", "run-42").with_node("impl"))
            .unwrap();

        let fake = FakeProcessInfo::new().with_process(
            pid,
            FakeProcess {
                alive: true,
                exe_path: self_exe(),
                cmdline: vec![
                    "attractor".to_string(),
                    "run".to_string(),
                    "--run-id".to_string(),
                    "run-42".to_string(),
                ],
                start_time,
            },
        );
        (store, fake)
    }

    /// Adapts a shared, mutable `FakeProcessInfo` to `&dyn ProcessInfo` so a
    /// concurrent task can flip `alive` mid-poll, the way a real process
    /// exiting would.
    struct SharedFake(Arc<parking_lot::Mutex<FakeProcessInfo>>);
    impl ProcessInfo for SharedFake {
        fn is_alive(&self, pid: i32) -> bool {
            self.0.lock().is_alive(pid)
        }
        fn exe_path(&self, pid: i32) -> Option<PathBuf> {
            self.0.lock().exe_path(pid)
        }
        fn cmdline(&self, pid: i32) -> Option<Vec<String>> {
            self.0.lock().cmdline(pid)
        }
        fn start_time(&self, pid: i32) -> Option<u64> {
            self.0.lock().start_time(pid)
        }
    }

    #[tokio::test]
    async fn graceful_poll_detects_exit_and_synthesizes_final() {
        let dir = tempfile::tempdir().unwrap();
        let (store, fake) = running_fixture(dir.path(), 4242, 99);
        let shared = Arc::new(parking_lot::Mutex::new(fake));
        let adapter = SharedFake(shared.clone());
        let start = adapter.start_time(4242).expect("fixture process reports a start time while alive");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shared.lock().set_alive(4242, false);
        });

        let exited = poll_until_exit(&adapter, 4242, start, Duration::from_secs(2)).await.unwrap();
        assert!(exited);

        let synthesized = ensure_final(&store, "run-42", "stopped_by_operator").unwrap();
        assert!(synthesized);
        let final_outcome = store.load_final().unwrap().unwrap();
        assert_eq!(final_outcome.failure_reason.as_deref(), Some("stopped_by_operator"));
    }

    #[tokio::test]
    async fn stop_refuses_when_state_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let fake = FakeProcessInfo::new();
        let err = stop(&store, &fake, &self_exe(), Duration::from_millis(100), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning(_)));
    }

    #[tokio::test]
    async fn stop_refuses_on_pid_reuse_with_different_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _original) = running_fixture(dir.path(), 5150, 100);

        // Simulate PID reuse: the pid is "alive" again, but owned by an
        // unrelated process with a different start time and cmdline.
        let reused = FakeProcessInfo::new().with_process(
            5150,
            FakeProcess {
                alive: true,
                exe_path: PathBuf::from("/usr/bin/unrelated"),
                cmdline: vec!["unrelated-process".to_string()],
                start_time: 200,
            },
        );

        let err = stop(&store, &reused, &self_exe(), Duration::from_millis(50), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::IdentityMismatch(_)));
    }

    #[test]
    fn cmdline_matching_accepts_run_id_or_logs_root() {
        let cmdline = vec!["attractor".to_string(), "run".to_string(), "--run-id".to_string(), "abc".to_string()];
        assert!(cmdline_is_attractor_run(&cmdline));
        assert!(cmdline_matches_run(&cmdline, "abc", Path::new("/anything")));
        assert!(!cmdline_matches_run(&cmdline, "xyz", Path::new("/anything")));
    }
}
