//! Fan-out/join: a fan-out node spawns N independent
//! child sub-schedulers rooted under `logs_root/<branch>/`, mirrors a digest
//! of each child's lifecycle into the parent's own `progress.ndjson`, and
//! waits for every child to terminalize before advancing. Parent and
//! children communicate only through the run store and an in-memory digest
//! channel — neither holds a reference into the other's mutable state.

use std::sync::Arc;

use attractor_core::{Graph, Node, Outcome};
use attractor_store::{ProgressEvent, RunStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::scheduler::{JoinPolicy, Scheduler, SchedulerConfig};

/// One fan-out branch: a name (used for the child's `logs_root` subdirectory
/// and digest labeling) and the node id within the shared graph where that
/// branch's sub-run begins.
#[derive(Debug, Clone)]
pub struct Branch {
    pub name: String,
    pub entry_node: String,
}

/// Parses the `branches` node attribute: `name:entry_node` pairs separated
/// by commas, e.g. `branches="frontend:fe_impl,backend:be_impl"`.
pub fn parse_branches(node: &Node) -> Vec<Branch> {
    node.attr("branches", "")
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, ':');
            let name = parts.next()?.trim().to_string();
            let entry_node = parts.next()?.trim().to_string();
            Some(Branch { name, entry_node })
        })
        .collect()
}

enum Digest {
    Started { branch: String },
    Terminal { branch: String, success: bool },
}

/// Runs every branch concurrently, mirrors a digest event per branch
/// lifecycle transition into the parent's progress journal, and returns the
/// synthesized [`Outcome`] once the configured [`JoinPolicy`] is decided.
///
/// `parent_cancel` is the fan-out node's own scheduler cancellation token;
/// each branch gets a child token derived from it, so cancelling the parent
/// cancels every branch that has not already terminalized.
pub async fn run_fan_out(
    graph: Arc<Graph>,
    parent_store: Arc<RunStore>,
    registry: Arc<HandlerRegistry>,
    run_id: String,
    fan_out_node: &Node,
    branches: Vec<Branch>,
    config: SchedulerConfig,
    parent_cancel: CancellationToken,
) -> Result<Outcome> {
    let join_policy = JoinPolicy::parse(fan_out_node.attr("join_policy", "all-success"));
    let (tx, mut rx) = mpsc::unbounded_channel::<Digest>();

    let mut handles = Vec::with_capacity(branches.len());
    for branch in &branches {
        let graph = graph.clone();
        let registry = registry.clone();
        let run_id_clone = run_id.clone();
        let branch_name = branch.name.clone();
        let entry = branch.entry_node.clone();
        let tx = tx.clone();
        let child_root = parent_store.logs_root().join(&branch_name);
        let config = config.clone();
        let child_cancel = parent_cancel.child_token();

        handles.push(tokio::spawn(async move {
            let _ = tx.send(Digest::Started { branch: branch_name.clone() });
            let child_store = match RunStore::open(&child_root) {
                Ok(s) => Arc::new(s),
                Err(_) => {
                    let _ = tx.send(Digest::Terminal { branch: branch_name, success: false });
                    return;
                }
            };
            let child_run_id = format!("{run_id_clone}::{branch_name}");
            let scheduler = Scheduler::new(graph, child_store, registry, child_run_id, config)
                .with_entry(entry)
                .with_cancel_token(child_cancel);
            let outcome = scheduler.run().await;
            let success = matches!(
                outcome,
                Ok(ref f) if f.status == attractor_store::TerminalStatus::Success
            );
            let _ = tx.send(Digest::Terminal { branch: branch_name, success });
        }));
    }
    drop(tx);

    let mut total = branches.len();
    let mut successes = 0usize;
    let mut finished = 0usize;
    while let Some(digest) = rx.recv().await {
        match digest {
            Digest::Started { branch } => {
                parent_store.emit_progress(
                    &ProgressEvent::new("fanout_branch_start", run_id.clone())
                        .with_node(fan_out_node.id.clone())
                        .with_field("branch", branch),
                )?;
            }
            Digest::Terminal { branch, success } => {
                finished += 1;
                if success {
                    successes += 1;
                }
                parent_store.emit_progress(
                    &ProgressEvent::new("fanout_branch_end", run_id.clone())
                        .with_node(fan_out_node.id.clone())
                        .with_field("branch", branch)
                        .with_field("success", success),
                )?;
            }
        }
        if finished == total {
            break;
        }
    }
    total = total.max(finished);

    for handle in handles {
        let _ = handle.await;
    }

    if join_policy.satisfied(successes, total) {
        Ok(Outcome::success())
    } else {
        Ok(Outcome::fail(format!(
            "fan-out join policy not satisfied: {successes}/{total} branches succeeded"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerRegistry, NullHandler};
    use crate::scheduler::SchedulerConfig;
    use attractor_core::{Node as CoreNode, NodeShape};
    use attractor_store::RunStore;
    use std::time::Duration;

    #[test]
    fn parses_name_entry_pairs() {
        let node = Node::new("fan", NodeShape::Action).with_attr("branches", "fe:fe_impl, be:be_impl");
        let branches = parse_branches(&node);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].name, "fe");
        assert_eq!(branches[0].entry_node, "fe_impl");
        assert_eq!(branches[1].entry_node, "be_impl");
    }

    #[test]
    fn join_policy_defaults_to_all_success() {
        assert!(JoinPolicy::parse("bogus").satisfied(1, 2) == false);
        assert_eq!(JoinPolicy::parse("all-success"), JoinPolicy::AllSuccess);
    }

    #[tokio::test]
    async fn cancelling_the_parent_token_cuts_a_branchs_retry_backoff_short() {
        use crate::handler::ScriptedHandler;
        use crate::retry::RetryPolicy;
        use attractor_core::{Edge, FailureClass, Graph, Status, START};

        let mut g = Graph::new();
        g.add_node(CoreNode::new(START, NodeShape::StartMarker)).unwrap();
        g.add_node(
            CoreNode::new("work", NodeShape::Action)
                .with_attr("llm_provider", "x")
                .with_attr("max_retries", "5"),
        )
        .unwrap();
        g.add_node(CoreNode::new("exit", NodeShape::ExitMarker)).unwrap();
        g.add_edge(Edge::new(START, "work"));
        g.add_edge(Edge::new("work", "exit"));
        let graph = Arc::new(g);

        // Every attempt fails transiently; with a multi-second backoff the
        // branch would otherwise still be sleeping long after this test's
        // timeout, so reaching a terminal outcome here can only be the
        // parent's cancellation token cutting that sleep short.
        let mut transient = Outcome::fail("connection reset");
        transient.failure_class = Some(FailureClass::TransientInfra);
        let script: Vec<Outcome> = std::iter::repeat(transient).take(5).collect();

        let registry = Arc::new(
            HandlerRegistry::new()
                .register(crate::handler::NodeKind::Start, Arc::new(NullHandler))
                .register(crate::handler::NodeKind::Exit, Arc::new(NullHandler))
                .register(crate::handler::NodeKind::Action, Arc::new(ScriptedHandler::new(script))),
        );

        let dir = tempfile::tempdir().unwrap();
        let parent_store = Arc::new(RunStore::open(dir.path()).unwrap());
        let fan_node = Node::new("fan", NodeShape::Action).with_attr("branches", "only:work");

        let mut config = SchedulerConfig::default();
        config.default_retry_policy = RetryPolicy::new(5).with_jitter(false).with_initial_interval(30.0);

        let parent_cancel = CancellationToken::new();
        let cancel_for_task = parent_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_for_task.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            run_fan_out(
                graph,
                parent_store,
                registry,
                "run-fanout-cancel".to_string(),
                &fan_node,
                parse_branches(&fan_node),
                config,
                parent_cancel,
            ),
        )
        .await
        .expect("fan-out should return promptly once the parent token is cancelled")
        .unwrap();

        assert_eq!(outcome.status, Status::Fail);
    }
}
