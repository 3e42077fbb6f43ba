//! Heartbeat emission, scoped so that leaving an attempt stops it
//! structurally rather than by convention. This is the single most-tested
//! invariant in the system: a heartbeat must never outlive — or reference a
//! node other than — the attempt that started it.

use std::sync::Arc;
use std::time::Duration;

use attractor_store::{ProgressEvent, RunStore};

/// An RAII guard tied to one node attempt. While alive, a background task
/// periodically emits `stage_heartbeat`. Dropping the guard (by any path:
/// normal return, early `?`, or a caught panic) aborts that task, so there
/// is no code path that can leave a heartbeat running past its attempt.
pub struct AttemptScope {
    handle: tokio::task::JoinHandle<()>,
}

impl AttemptScope {
    pub fn start(store: Arc<RunStore>, run_id: String, node_id: String, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            loop {
                tokio::time::sleep(interval).await;
                let elapsed_s = start.elapsed().as_secs_f64();
                let event = ProgressEvent::new("stage_heartbeat", run_id.clone())
                    .with_node(node_id.clone())
                    .with_field("elapsed_s", elapsed_s);
                if let Err(e) = store.emit_progress(&event) {
                    tracing::warn!(error = %e, "failed to emit heartbeat");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for AttemptScope {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
