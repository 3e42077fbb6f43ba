//! Process identity reading, abstracted behind [`ProcessInfo`] so
//! [`crate::stop::stop`] can run against a real backend or an injected fake
//! procfs-like backend for tests.

use std::path::PathBuf;

/// Everything the stop algorithm needs to know about a candidate pid.
pub trait ProcessInfo: Send + Sync {
    fn is_alive(&self, pid: i32) -> bool;
    fn exe_path(&self, pid: i32) -> Option<PathBuf>;
    fn cmdline(&self, pid: i32) -> Option<Vec<String>>;
    /// An opaque, comparable fingerprint of when `pid` started. Must stay
    /// stable for the life of the process and differ across a PID reuse.
    fn start_time(&self, pid: i32) -> Option<u64>;
}

/// Reads `/proc/<pid>/{exe,cmdline,stat}` directly. The primary backend on
/// Linux, where this information is always available without spawning a
/// subprocess.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsProcessInfo;

impl ProcessInfo for ProcfsProcessInfo {
    fn is_alive(&self, pid: i32) -> bool {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }

    fn exe_path(&self, pid: i32) -> Option<PathBuf> {
        std::fs::read_link(format!("/proc/{pid}/exe")).ok()
    }

    fn cmdline(&self, pid: i32) -> Option<Vec<String>> {
        let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        Some(
            raw.split(|b| *b == 0)
                .filter(|s| !s.is_empty())
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
        )
    }

    /// Field 22 (starttime, in clock ticks since boot) of `/proc/<pid>/stat`.
    /// `comm` (field 2) is parenthesized and may itself contain spaces or
    /// parens, so the remainder is located by splitting on the *last* `)`
    /// rather than by whitespace position from the start of the line.
    fn start_time(&self, pid: i32) -> Option<u64> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let after_comm = stat.rsplit_once(')')?.1;
        after_comm.split_whitespace().nth(19)?.parse().ok()
    }
}

/// Falls back to the `ps` binary when `/proc` is unavailable. Coarser: `ps`
/// cannot report a resolved executable path, so identity verification on
/// this backend relies on the cmdline and start-time checks alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsProcessInfo;

impl PsProcessInfo {
    fn ps_field(pid: i32, field: &str) -> Option<String> {
        let output = std::process::Command::new("ps")
            .args(["-o", field, "-p", &pid.to_string()])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let line = text.lines().next()?.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl ProcessInfo for PsProcessInfo {
    fn is_alive(&self, pid: i32) -> bool {
        Self::ps_field(pid, "pid=").is_some()
    }

    fn exe_path(&self, _pid: i32) -> Option<PathBuf> {
        None
    }

    fn cmdline(&self, pid: i32) -> Option<Vec<String>> {
        Self::ps_field(pid, "args=").map(|s| s.split_whitespace().map(str::to_string).collect())
    }

    fn start_time(&self, pid: i32) -> Option<u64> {
        let lstart = Self::ps_field(pid, "lstart=")?;
        Some(fingerprint(&lstart))
    }
}

fn fingerprint(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// An injectable fake for exercising [`crate::stop::stop`] without a real
/// subprocess, e.g. simulating PID reuse.
#[derive(Debug, Default, Clone)]
pub struct FakeProcessInfo {
    processes: std::collections::HashMap<i32, FakeProcess>,
}

#[derive(Debug, Clone)]
pub struct FakeProcess {
    pub alive: bool,
    pub exe_path: PathBuf,
    pub cmdline: Vec<String>,
    pub start_time: u64,
}

impl FakeProcessInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process(mut self, pid: i32, process: FakeProcess) -> Self {
        self.processes.insert(pid, process);
        self
    }

    /// Mutates an already-registered process in place (e.g. to flip `alive`
    /// to false mid-poll, simulating the supervised process exiting).
    pub fn set_alive(&mut self, pid: i32, alive: bool) {
        if let Some(p) = self.processes.get_mut(&pid) {
            p.alive = alive;
        }
    }
}

impl ProcessInfo for FakeProcessInfo {
    fn is_alive(&self, pid: i32) -> bool {
        self.processes.get(&pid).map(|p| p.alive).unwrap_or(false)
    }

    fn exe_path(&self, pid: i32) -> Option<PathBuf> {
        self.processes.get(&pid).map(|p| p.exe_path.clone())
    }

    fn cmdline(&self, pid: i32) -> Option<Vec<String>> {
        self.processes.get(&pid).map(|p| p.cmdline.clone())
    }

    fn start_time(&self, pid: i32) -> Option<u64> {
        self.processes.get(&pid).filter(|p| p.alive).map(|p| p.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_reports_no_process_for_unknown_pid() {
        let fake = FakeProcessInfo::new();
        assert!(!fake.is_alive(1234));
        assert!(fake.cmdline(1234).is_none());
    }

    #[test]
    fn fake_start_time_disappears_once_marked_dead() {
        let mut fake = FakeProcessInfo::new().with_process(
            42,
            FakeProcess {
                alive: true,
                exe_path: PathBuf::from("/usr/bin/attractor"),
                cmdline: vec!["attractor".into(), "run".into()],
                start_time: 7,
            },
        );
        assert_eq!(fake.start_time(42), Some(7));
        fake.set_alive(42, false);
        assert_eq!(fake.start_time(42), None);
        assert!(!fake.is_alive(42));
    }
}
