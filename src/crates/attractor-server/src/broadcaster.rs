//! Per-run event history and live fan-out for SSE subscribers: a new
//! subscriber receives every historical event then live events until the
//! broadcaster closes. The replay buffer is an unbounded log rather than a
//! fixed-size ring — a capped ring would silently truncate a late
//! subscriber's history replay.

use std::collections::VecDeque;
use std::sync::Arc;

use attractor_store::ProgressEvent;
use tokio::sync::{broadcast, watch};

/// One run's in-memory event log plus the live fan-out channel. The only
/// in-memory copy of this run's event history; subscriber
/// channels are per-client and unsynchronized with scheduler advance.
pub struct RunBroadcaster {
    history: parking_lot::Mutex<VecDeque<ProgressEvent>>,
    live: broadcast::Sender<ProgressEvent>,
    /// `true` once closed. A `watch` rather than a plain atomic so an SSE
    /// stream already blocked on `live.recv()` can be woken by `close()`
    /// instead of waiting for an event that will never come.
    closed: watch::Sender<bool>,
}

/// Bounds subscriber channel depth: if a subscriber's
/// buffered channel is full on send, drop that subscriber. Tokio's
/// broadcast channel already implements "drop the lagging receiver" via
/// `RecvError::Lagged`; this capacity is how big a burst a slow client can
/// absorb before it lags and gets disconnected.
const CHANNEL_CAPACITY: usize = 1024;

impl RunBroadcaster {
    pub fn new() -> Self {
        let (live, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let (closed, _rx) = watch::channel(false);
        Self {
            history: parking_lot::Mutex::new(VecDeque::new()),
            live,
            closed,
        }
    }

    /// Appends to history and fans out to live subscribers. Send errors (no
    /// receivers) are not failures: a run with no SSE subscriber yet is the
    /// common case.
    pub fn publish(&self, event: ProgressEvent) {
        self.history.lock().push_back(event.clone());
        let _ = self.live.send(event);
    }

    /// Marks this run's event stream as finished. Subsequent subscribers
    /// still receive full history replay, but are told `done` immediately
    /// after rather than waiting on a live channel that will never produce
    /// another event; subscribers already parked in `recv()` are woken too.
    pub fn close(&self) {
        let _ = self.closed.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// A receiver that resolves once `close()` is called, for racing
    /// against `live.recv()` in a subscriber's read loop.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn history(&self) -> Vec<ProgressEvent> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.live.subscribe()
    }
}

impl Default for RunBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBroadcaster = Arc<RunBroadcaster>;
