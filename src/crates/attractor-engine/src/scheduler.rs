//! The scheduler (C6): the attempt loop, retry policy, failure
//! classification, cycle breaker, fan-out/join, and progress emission that
//! together advance a single run's token through the graph.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use attractor_core::{CompiledExpr, Context, EvalContext, Graph, Node, NodeShape, Outcome, Status, START};
use attractor_store::{CheckpointState, FinalOutcome, ProgressEvent, RunStore, TerminalStatus};
use tokio_util::sync::CancellationToken;

use crate::cycle_breaker::{canonicalize, CycleBreaker};
use crate::error::{EngineError, Result};
use crate::handler::{HandlerRegistry, NodeKind};
use crate::heartbeat::AttemptScope;
use crate::interviewer::{AnswerOutcome, Interviewer};
use crate::retry::{default_max_attempts, RetryPolicy};

/// How a fan-out node's children are joined back into the parent's own
/// outcome. Read from the node attribute `join_policy`, an explicit
/// attribute rather than something inferred from graph shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    AllSuccess,
    AnySuccess,
    MajoritySuccess,
}

impl JoinPolicy {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "any-success" => Self::AnySuccess,
            "majority-success" => Self::MajoritySuccess,
            _ => Self::AllSuccess,
        }
    }

    pub fn satisfied(&self, successes: usize, total: usize) -> bool {
        if total == 0 {
            return true;
        }
        match self {
            JoinPolicy::AllSuccess => successes == total,
            JoinPolicy::AnySuccess => successes >= 1,
            JoinPolicy::MajoritySuccess => successes * 2 > total,
        }
    }
}

/// Tunables for one scheduler run, separate from anything declared on the
/// graph itself.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub signature_limit: usize,
    pub stall_check_interval: Duration,
    pub default_retry_policy: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            signature_limit: 3,
            stall_check_interval: Duration::from_secs(10),
            default_retry_policy: RetryPolicy::default(),
        }
    }
}

/// Drives one run from its graph's start node to a terminal exit, persisting
/// checkpoints/progress/final via a [`RunStore`] and invoking handlers
/// through a [`HandlerRegistry`].
pub struct Scheduler {
    graph: Arc<Graph>,
    store: Arc<RunStore>,
    registry: Arc<HandlerRegistry>,
    context: Context,
    run_id: String,
    cancel: CancellationToken,
    config: SchedulerConfig,
    entry_override: Option<String>,
    interviewer: Interviewer,
}

/// Guarantees `final.json` is written exactly once per run no matter which
/// path exits [`Scheduler::run`] — every code path that ends the run writes
/// `final.json` exactly once. Armed on construction;
/// `disarm` is called once the run loop itself has written a terminal
/// outcome, so only the *un-terminalized* exit paths (errors, panics,
/// cancellation) fall through to this guard's synthesized fail.
struct TerminalGuard {
    store: Arc<RunStore>,
    run_id: String,
    armed: AtomicBool,
}

impl TerminalGuard {
    fn new(store: Arc<RunStore>, run_id: String) -> Self {
        Self {
            store,
            run_id,
            armed: AtomicBool::new(true),
        }
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.armed.load(Ordering::SeqCst) {
            let outcome = FinalOutcome::new(self.run_id.clone(), TerminalStatus::Fail)
                .with_failure_reason("fatal_internal: run loop exited without terminalizing");
            if let Err(e) = self.store.save_final(&outcome) {
                tracing::error!(error = %e, "failed to synthesize final.json from terminal guard");
            }
        }
    }
}

impl Scheduler {
    pub fn new(
        graph: Arc<Graph>,
        store: Arc<RunStore>,
        registry: Arc<HandlerRegistry>,
        run_id: impl Into<String>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            graph,
            store,
            registry,
            context: Context::new(),
            run_id: run_id.into(),
            cancel: CancellationToken::new(),
            config,
            entry_override: None,
            interviewer: Interviewer::new(),
        }
    }

    /// Overrides the node the run begins at, used by fan-out to start a
    /// child scheduler at a branch's declared entry node instead of the
    /// shared graph's own start marker.
    pub fn with_entry(mut self, node_id: impl Into<String>) -> Self {
        self.entry_override = Some(node_id.into());
        self
    }

    /// Overrides this scheduler's cancellation token, used by fan-out to
    /// give each child a token derived from the parent's so cancelling the
    /// parent cancels every still-running branch.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels the run: any in-flight retry delay returns early as a
    /// `cancelled` failure, and any in-flight `ask` unblocks with
    /// [`AnswerOutcome::Cancelled`], unblocking pending questions.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.interviewer.cancel();
    }

    /// The shared human-gate coordinator for this run. A submission server
    /// holds this handle to serve `/pipelines/{id}/questions`
    /// and `/pipelines/{id}/questions/{qid}/answer`.
    pub fn interviewer(&self) -> Interviewer {
        self.interviewer.clone()
    }

    /// Runs the graph from its start node to a terminal exit. Always returns
    /// `Ok` with the terminal outcome that was (or already had been) written
    /// — handler/internal failures terminate the run with `status: fail`
    /// rather than propagating.
    pub async fn run(&self) -> Result<FinalOutcome> {
        let guard = TerminalGuard::new(self.store.clone(), self.run_id.clone());
        let outcome = self.run_inner().await;
        guard.disarm();

        let final_outcome = match outcome {
            Ok(fo) => fo,
            Err(e) => FinalOutcome::new(self.run_id.clone(), TerminalStatus::Fail)
                .with_failure_reason(e.to_string()),
        };
        self.store.save_final(&final_outcome)?;
        Ok(self.store.load_final()?.unwrap_or(final_outcome))
    }

    async fn run_inner(&self) -> Result<FinalOutcome> {
        let start = self.entry_override.clone().unwrap_or_else(|| {
            self.graph
                .start_nodes()
                .first()
                .map(|n| n.id.clone())
                .unwrap_or_else(|| START.to_string())
        });

        let mut current = start;
        let mut completed: Vec<String> = Vec::new();
        let mut node_retries: HashMap<String, u32> = HashMap::new();
        let mut cycle_breaker = CycleBreaker::new(self.config.signature_limit);

        loop {
            if self.cancel.is_cancelled() {
                return Ok(FinalOutcome::new(self.run_id.clone(), TerminalStatus::Fail)
                    .with_failure_reason("cancelled"));
            }

            let node = self
                .graph
                .nodes
                .get(&current)
                .ok_or_else(|| EngineError::FatalInternal(format!("unknown node '{current}'")))?
                .clone();

            if node.shape == NodeShape::ExitMarker {
                completed.push(node.id.clone());
                self.checkpoint(&current, &completed, &node_retries)?;
                return Ok(FinalOutcome::new(self.run_id.clone(), TerminalStatus::Success));
            }

            let outcome = if node.attr_bool("human_gate", false) {
                self.ask_human_gate(&node).await?
            } else if node.attr_bool("fan_out", false) {
                let branches = crate::fanout::parse_branches(&node);
                crate::fanout::run_fan_out(
                    self.graph.clone(),
                    self.store.clone(),
                    self.registry.clone(),
                    self.run_id.clone(),
                    &node,
                    branches,
                    self.config.clone(),
                    self.cancel.clone(),
                )
                .await?
            } else {
                let (outcome, attempts) = self.attempt_node(&node, &mut cycle_breaker).await?;
                *node_retries.entry(node.id.clone()).or_insert(0) += (attempts - 1) as u32;
                outcome
            };
            self.context.merge(outcome.context_updates.clone());
            completed.push(node.id.clone());
            self.checkpoint(&current, &completed, &node_retries)?;

            match self.select_edge(&node, &outcome) {
                Some(edge) => {
                    self.store.emit_progress(
                        &ProgressEvent::new("edge_selected", self.run_id.clone())
                            .with_node(node.id.clone())
                            .with_field("to", edge.to.clone()),
                    )?;
                    current = edge.to.clone();
                }
                None => {
                    self.store.emit_progress(
                        &ProgressEvent::new("no_matching_edge", self.run_id.clone())
                            .with_node(node.id.clone()),
                    )?;
                    if let Some(fallback) = self
                        .graph
                        .attrs
                        .get("retry_target")
                        .or_else(|| self.graph.attrs.get("fallback_retry_target"))
                    {
                        current = fallback.clone();
                        continue;
                    }
                    return Ok(FinalOutcome::new(self.run_id.clone(), TerminalStatus::Fail)
                        .with_failure_reason(format!("no_matching_edge at '{}'", node.id)));
                }
            }
        }
    }

    fn checkpoint(
        &self,
        current: &str,
        completed: &[String],
        node_retries: &HashMap<String, u32>,
    ) -> Result<()> {
        const CAP: usize = 10_000;
        let mut dedup = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for id in completed.iter().rev() {
            if seen.insert(id.clone()) {
                dedup.push(id.clone());
            }
        }
        dedup.reverse();
        if dedup.len() > CAP {
            let excess = dedup.len() - CAP;
            dedup.drain(0..excess);
        }

        let state = CheckpointState {
            current_node_id: Some(current.to_string()),
            completed_nodes: dedup,
            node_retries: node_retries.clone(),
            git_commit_sha: None,
        };
        Ok(self.store.save_checkpoint(&state)?)
    }

    /// The per-node attempt loop: invoke the handler, classify the outcome,
    /// retry transient failures within budget, and route deterministic ones.
    /// Returns the outcome alongside how many attempts it took, so the
    /// caller can maintain `checkpoint.json.node_retries`.
    async fn attempt_node(
        &self,
        node: &Node,
        cycle_breaker: &mut CycleBreaker,
    ) -> Result<(Outcome, usize)> {
        let max_attempts: usize = node
            .attr("max_retries", "")
            .parse::<usize>()
            .unwrap_or_else(|_| default_max_attempts(node.shape));

        let mut policy = self.config.default_retry_policy.clone();
        policy.max_attempts = max_attempts;
        let mut attempt = 1usize;

        loop {
            self.store.emit_progress(
                &ProgressEvent::new("stage_attempt_start", self.run_id.clone())
                    .with_node(node.id.clone())
                    .with_field("attempt", attempt as u64)
                    .with_field("max", max_attempts as u64),
            )?;

            let scope = AttemptScope::start(
                self.store.clone(),
                self.run_id.clone(),
                node.id.clone(),
                self.config.stall_check_interval,
            );

            let started = std::time::Instant::now();
            let outcome = self.invoke_handler(node).await;
            drop(scope);

            let outcome = match outcome {
                Ok(o) => o,
                Err(e) => Outcome::fail(format!("handler error: {e}")),
            };

            self.store.emit_progress(
                &ProgressEvent::new("stage_attempt_end", self.run_id.clone())
                    .with_node(node.id.clone())
                    .with_field("status", outcome.status.canonical())
                    .with_field(
                        "failure_reason",
                        outcome.failure_reason.clone().unwrap_or_default(),
                    )
                    .with_field("duration_ms", started.elapsed().as_millis() as u64),
            )?;

            if outcome.status.is_terminal_success() {
                return Ok((outcome, attempt));
            }

            let is_transient = matches!(
                outcome.failure_class,
                Some(attractor_core::FailureClass::TransientInfra)
            ) || outcome.status == Status::Retry;

            if outcome.status == Status::Fail && !is_transient {
                // Deterministic failure: no retry, routing decides next step.
                return Ok((outcome, attempt));
            }

            // Transient: consult the cycle breaker before consuming another
            // retry budget.
            let signature = outcome
                .failure_signature
                .clone()
                .unwrap_or_else(|| canonicalize(outcome.failure_reason.as_deref().unwrap_or("")));
            if cycle_breaker.record(&node.id, &signature) {
                self.store.emit_progress(
                    &ProgressEvent::new("deterministic_failure_cycle_check", self.run_id.clone())
                        .with_node(node.id.clone())
                        .with_field("signature", signature.clone()),
                )?;
                let mut broken = outcome;
                broken.failure_class = Some(attractor_core::FailureClass::Deterministic);
                return Ok((broken, attempt));
            }

            if !policy.should_retry(attempt) {
                return Ok((outcome, attempt));
            }

            let delay = policy.calculate_delay(attempt - 1);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
            attempt += 1;
        }
    }

    /// A human-gate node: blocks the run at this node
    /// until an operator answers, a per-question timeout elapses, or the run
    /// is cancelled. `ask_timeout_s` defaults to 300 (5 minutes).
    async fn ask_human_gate(&self, node: &Node) -> Result<Outcome> {
        let prompt = node.attr("prompt", "");
        let timeout_s: u64 = node.attr("ask_timeout_s", "300").parse().unwrap_or(300);

        self.store.emit_progress(
            &ProgressEvent::new("human_gate_ask", self.run_id.clone()).with_node(node.id.clone()),
        )?;

        let answer = self.interviewer.ask(&node.id, prompt, Duration::from_secs(timeout_s)).await;

        let outcome = match answer {
            AnswerOutcome::Answered(text) => {
                let mut outcome = Outcome::success();
                outcome
                    .context_updates
                    .insert(format!("{}.answer", node.id), serde_json::Value::String(text));
                outcome
            }
            AnswerOutcome::TimedOut => Outcome::fail("human_gate timed out waiting for an answer"),
            AnswerOutcome::Cancelled => Outcome::fail("cancelled"),
        };

        self.store.emit_progress(
            &ProgressEvent::new("human_gate_resolved", self.run_id.clone())
                .with_node(node.id.clone())
                .with_field("status", outcome.status.canonical()),
        )?;

        Ok(outcome)
    }

    async fn invoke_handler(&self, node: &Node) -> std::result::Result<Outcome, String> {
        let kind = resolve_kind(node);
        match self.registry.get(kind) {
            Some(handler) => handler.handle(node, &self.context).await,
            None => Err(format!("no handler registered for node kind {kind:?}")),
        }
    }

    /// Selects the first outgoing edge (in declaration order) whose guard
    /// evaluates true against the given outcome.
    fn select_edge<'g>(&'g self, node: &Node, outcome: &Outcome) -> Option<&'g attractor_core::Edge> {
        let eval_ctx = EvalContext {
            status: outcome.status,
            preferred_label: outcome.preferred_label.as_deref(),
            context: &self.context.snapshot(),
        };
        self.graph.outgoing(&node.id).iter().find(|edge| {
            CompiledExpr::parse(edge.condition())
                .map(|expr| expr.eval(&eval_ctx))
                .unwrap_or(false)
        })
    }
}

fn resolve_kind(node: &Node) -> NodeKind {
    match node.shape {
        NodeShape::StartMarker => NodeKind::Start,
        NodeShape::ExitMarker => NodeKind::Exit,
        NodeShape::Action => NodeKind::Action,
        NodeShape::Conditional => NodeKind::Conditional,
        NodeShape::Tool => NodeKind::Tool,
    }
}
