//! The `status` subcommand: a one-shot snapshot, or a polling follow/watch
//! loop, over a run's on-disk artifacts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use attractor_store::{load_snapshot, RunStore, Snapshot};

pub struct StatusArgs {
    pub logs_root: PathBuf,
    pub json: bool,
    pub follow: bool,
    pub watch: bool,
    pub latest: bool,
    pub interval: Duration,
}

/// Resolves `--latest`: if set, `root` is treated as a parent directory of
/// per-run subdirectories and the most-recently-modified one is used.
/// Otherwise `root` is the run's own logs_root.
pub fn resolve_logs_root(root: &Path, latest: bool) -> std::io::Result<PathBuf> {
    if !latest {
        return Ok(root.to_path_buf());
    }
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            best = Some((modified, entry.path()));
        }
    }
    Ok(best.map(|(_, p)| p).unwrap_or_else(|| root.to_path_buf()))
}

fn print_snapshot(snapshot: &Snapshot, json: bool) {
    if json {
        println!("{}", serde_json::to_string(snapshot).unwrap_or_default());
    } else {
        println!(
            "run_id={} state={:?} node={} pid={} event={}",
            snapshot.run_id.as_deref().unwrap_or("-"),
            snapshot.state,
            snapshot.current_node_id.as_deref().unwrap_or("-"),
            snapshot.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            snapshot.last_event.as_deref().unwrap_or("-"),
        );
    }
}

/// Prints a single snapshot, or polls at `interval` (`--follow`/`--watch`)
/// until the run reaches a terminal state. `--follow` also echoes every new
/// `progress.ndjson` line as it appears; `--watch` only re-prints the
/// snapshot line itself.
pub async fn run_status(args: StatusArgs) -> anyhow::Result<i32> {
    let logs_root = resolve_logs_root(&args.logs_root, args.latest)?;
    let store = RunStore::open(&logs_root)?;

    if !args.follow && !args.watch {
        let snapshot = load_snapshot(&store)?;
        let code = exit_code_for(&snapshot);
        print_snapshot(&snapshot, args.json);
        return Ok(code);
    }

    let mut seen = 0usize;
    loop {
        let snapshot = load_snapshot(&store)?;

        if args.follow {
            let events = store.load_all_progress().unwrap_or_default();
            for event in events.iter().skip(seen) {
                println!("{}", serde_json::to_string(event).unwrap_or_default());
            }
            seen = events.len();
        } else {
            print_snapshot(&snapshot, args.json);
        }

        if snapshot.state == attractor_store::RunState::Success || snapshot.state == attractor_store::RunState::Fail {
            if args.follow {
                print_snapshot(&snapshot, args.json);
            }
            return Ok(exit_code_for(&snapshot));
        }

        tokio::time::sleep(args.interval).await;
    }
}

fn exit_code_for(snapshot: &Snapshot) -> i32 {
    match snapshot.state {
        attractor_store::RunState::Success => 0,
        _ => 1,
    }
}
