//! The human-gate interviewer (C10): blocks a branch at `ask` until an
//! answer, timeout, or run cancellation arrives. Multiple parallel branches
//! may each have an in-flight question at once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub node_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnswerOutcome {
    Answered(String),
    TimedOut,
    Cancelled,
}

/// A single human-gate coordination point for one run. Cheaply cloneable;
/// every branch that reaches a human-gate node shares the same instance.
#[derive(Clone)]
pub struct Interviewer {
    inner: Arc<Inner>,
}

struct Inner {
    pending: DashMap<String, Question>,
    waiters: DashMap<String, oneshot::Sender<String>>,
    cancel: CancellationToken,
}

impl Interviewer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                waiters: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Blocks until answered, timed out, or cancelled. Generates a fresh
    /// synthetic question id so concurrent branches never collide.
    pub async fn ask(&self, node_id: &str, prompt: &str, timeout: Duration) -> AnswerOutcome {
        let qid = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.insert(qid.clone(), tx);
        self.inner.pending.insert(
            qid.clone(),
            Question {
                id: qid.clone(),
                node_id: node_id.to_string(),
                prompt: prompt.to_string(),
            },
        );

        let result = tokio::select! {
            answer = rx => match answer {
                Ok(text) => AnswerOutcome::Answered(text),
                Err(_) => AnswerOutcome::Cancelled,
            },
            _ = tokio::time::sleep(timeout) => AnswerOutcome::TimedOut,
            _ = self.inner.cancel.cancelled() => AnswerOutcome::Cancelled,
        };

        self.inner.pending.remove(&qid);
        self.inner.waiters.remove(&qid);
        result
    }

    /// Delivers an answer to a pending question. Returns `false` if the qid
    /// is unknown or already resolved (answered, timed out, or cancelled).
    pub fn answer(&self, qid: &str, text: String) -> bool {
        match self.inner.waiters.remove(qid) {
            Some((_, tx)) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Snapshot of every question currently awaiting an answer.
    pub fn pending(&self) -> Vec<Question> {
        self.inner.pending.iter().map(|e| e.value().clone()).collect()
    }

    /// Unblocks every in-flight `ask` with `AnswerOutcome::Cancelled`.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }
}

impl Default for Interviewer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answer_unblocks_a_pending_ask() {
        let interviewer = Interviewer::new();
        let ask_interviewer = interviewer.clone();
        let handle = tokio::spawn(async move {
            ask_interviewer.ask("gate", "proceed?", Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = interviewer.pending();
        assert_eq!(pending.len(), 1);
        assert!(interviewer.answer(&pending[0].id, "yes".to_string()));

        let result = handle.await.unwrap();
        assert_eq!(result, AnswerOutcome::Answered("yes".to_string()));
    }

    #[tokio::test]
    async fn unanswered_ask_times_out() {
        let interviewer = Interviewer::new();
        let result = interviewer.ask("gate", "proceed?", Duration::from_millis(10)).await;
        assert_eq!(result, AnswerOutcome::TimedOut);
    }

    #[tokio::test]
    async fn cancel_unblocks_every_in_flight_ask() {
        let interviewer = Interviewer::new();
        let a = interviewer.clone();
        let b = interviewer.clone();
        let h1 = tokio::spawn(async move { a.ask("g1", "p", Duration::from_secs(5)).await });
        let h2 = tokio::spawn(async move { b.ask("g2", "p", Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        interviewer.cancel();
        assert_eq!(h1.await.unwrap(), AnswerOutcome::Cancelled);
        assert_eq!(h2.await.unwrap(), AnswerOutcome::Cancelled);
    }

    #[tokio::test]
    async fn answering_an_unknown_qid_returns_false() {
        let interviewer = Interviewer::new();
        assert!(!interviewer.answer("nope", "x".to_string()));
    }
}
