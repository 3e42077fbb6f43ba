//! Bridges a [`RunStore`]'s on-disk `progress.ndjson` into a
//! [`RunBroadcaster`] without the scheduler or store crates knowing the
//! submission server exists — the store is single-writer,
//! many-reader; a tailer is just another reader. Runs in-process alongside
//! the scheduler here, but the same mechanism works against a detached
//! `attractor run` process's logs_root.

use std::sync::Arc;
use std::time::Duration;

use attractor_store::RunStore;

use crate::broadcaster::RunBroadcaster;

/// How often the tailer re-checks `progress.ndjson` for new lines. Matches
/// the scheduler's default `stall_check_interval_ms`-scale cadence: frequent
/// enough that SSE subscribers see events promptly, cheap enough not to
/// matter at the concurrency this server runs at.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tails `store`'s progress log into `broadcaster` until `final.json`
/// appears, then publishes any trailing lines once more and closes the
/// broadcaster. Spawned once per run at submit time.
pub async fn tail_progress(store: Arc<RunStore>, broadcaster: Arc<RunBroadcaster>, poll_interval: Duration) {
    let mut offset: usize = 0;
    loop {
        offset = publish_new_lines(&store, &broadcaster, offset);
        if store.load_final().ok().flatten().is_some() {
            // One last pass: the scheduler may have appended its closing
            // progress event in the same instant it wrote final.json.
            let _ = publish_new_lines(&store, &broadcaster, offset);
            broadcaster.close();
            return;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Re-reads `progress.ndjson` from scratch and publishes every line past
/// `offset` lines already seen. Simpler and more robust against the file
/// being appended mid-read than tracking a byte cursor, at the cost of
/// re-reading the whole file each poll; `progress.ndjson` for a single run
/// is not expected to grow beyond a few thousand lines.
fn publish_new_lines(store: &RunStore, broadcaster: &RunBroadcaster, offset: usize) -> usize {
    let events = store.load_all_progress().unwrap_or_default();
    for event in events.iter().skip(offset) {
        broadcaster.publish(event.clone());
    }
    events.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use attractor_store::ProgressEvent;

    #[tokio::test]
    async fn tailer_publishes_every_event_and_closes_on_final() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RunStore::open(dir.path()).unwrap());
        let broadcaster = Arc::new(RunBroadcaster::new());

        for i in 0..5 {
            store
                .emit_progress(&ProgressEvent::new(format!("e{i}"), "run-1"))
                .unwrap();
        }
        store
            .save_final(&attractor_store::FinalOutcome::new("run-1", attractor_store::TerminalStatus::Success))
            .unwrap();

        tail_progress(store, broadcaster.clone(), Duration::from_millis(5)).await;

        assert_eq!(broadcaster.history().len(), 5);
        assert!(broadcaster.is_closed());
    }
}
