//! End-to-end scheduler scenarios: each test drives a full `Scheduler::run()`
//! over a small graph from its own `RunStore`, the way a real pipeline run
//! would, rather than unit-testing any single internal function.

use std::sync::Arc;

use attractor_core::{Edge, FailureClass, Graph, Node, NodeShape, Outcome, START};
use attractor_engine::{HandlerRegistry, NodeHandler, NodeKind, NullHandler, RetryPolicy, Scheduler, SchedulerConfig, ScriptedHandler};
use attractor_store::{RunStore, TerminalStatus};

fn base_graph() -> Graph {
    let mut g = Graph::new();
    g.add_node(Node::new(START, NodeShape::StartMarker)).unwrap();
    g.add_node(Node::new("impl", NodeShape::Action).with_attr("llm_provider", "x"))
        .unwrap();
    g.add_node(Node::new("exit", NodeShape::ExitMarker)).unwrap();
    g.add_edge(Edge::new(START, "impl"));
    g.add_edge(Edge::new("impl", "exit"));
    g
}

fn registry(impl_handler: Arc<dyn NodeHandler>) -> Arc<HandlerRegistry> {
    Arc::new(
        HandlerRegistry::new()
            .register(NodeKind::Start, Arc::new(NullHandler))
            .register(NodeKind::Exit, Arc::new(NullHandler))
            .register(NodeKind::Action, impl_handler),
    )
}

#[tokio::test]
async fn s1_linear_success_writes_final_success_and_two_edges() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());
    let graph = Arc::new(base_graph());
    let reg = registry(Arc::new(NullHandler));

    let scheduler = Scheduler::new(graph, store.clone(), reg, "run-1", SchedulerConfig::default());
    let final_outcome = scheduler.run().await.unwrap();
    assert_eq!(final_outcome.status, TerminalStatus::Success);

    let contents = std::fs::read_to_string(dir.path().join("progress.ndjson")).unwrap();
    let edge_events = contents.lines().filter(|l| l.contains("edge_selected")).count();
    assert_eq!(edge_events, 2);
    let retry_events = contents.lines().filter(|l| l.contains("stage_attempt_start")).count();
    assert_eq!(retry_events, 2); // start + impl (exit never attempts a handler loop body)
}

#[tokio::test]
async fn s2_deterministic_fail_routes_to_recovery_with_verbatim_reason() {
    let mut g = Graph::new();
    g.add_node(Node::new(START, NodeShape::StartMarker)).unwrap();
    g.add_node(Node::new("impl", NodeShape::Action).with_attr("llm_provider", "x"))
        .unwrap();
    g.add_node(Node::new("check", NodeShape::Conditional)).unwrap();
    g.add_node(Node::new("postmortem", NodeShape::Action).with_attr("llm_provider", "x"))
        .unwrap();
    g.add_node(Node::new("exit", NodeShape::ExitMarker)).unwrap();
    g.add_edge(Edge::new(START, "impl"));
    g.add_edge(Edge::new("impl", "check"));
    g.add_edge(
        Edge::new("check", "postmortem").with_condition("outcome=fail && context.failure_class!=transient_infra"),
    );
    g.add_edge(Edge::new("check", "exit").with_condition("outcome=success"));
    g.add_edge(Edge::new("postmortem", "exit"));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());

    let fail_outcome = {
        let mut o = Outcome::fail("lint X");
        o.failure_class = Some(FailureClass::Deterministic);
        o
    };
    let reg = Arc::new(
        HandlerRegistry::new()
            .register(NodeKind::Start, Arc::new(NullHandler))
            .register(NodeKind::Exit, Arc::new(NullHandler))
            .register(NodeKind::Conditional, Arc::new(NullHandler))
            .register(
                NodeKind::Action,
                Arc::new(ScriptedHandler::new(vec![fail_outcome, Outcome::success()])),
            ),
    );

    let scheduler = Scheduler::new(Arc::new(g), store, reg, "run-2", SchedulerConfig::default());
    let final_outcome = scheduler.run().await.unwrap();
    assert_eq!(final_outcome.status, TerminalStatus::Success);
}

#[tokio::test]
async fn s3_transient_retries_then_cycle_breaker_trips() {
    let mut g = Graph::new();
    g.add_node(Node::new(START, NodeShape::StartMarker)).unwrap();
    g.add_node(
        Node::new("impl", NodeShape::Action)
            .with_attr("llm_provider", "x")
            .with_attr("max_retries", "10"),
    )
    .unwrap();
    g.add_node(Node::new("exit", NodeShape::ExitMarker)).unwrap();
    g.add_edge(Edge::new(START, "impl"));
    g.add_edge(Edge::new("impl", "exit"));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());

    let mut transient = Outcome::fail("connection reset");
    transient.failure_class = Some(FailureClass::TransientInfra);
    transient.failure_signature = Some("net_blip".to_string());

    let script: Vec<Outcome> = std::iter::repeat(transient).take(10).collect();
    let reg = Arc::new(
        HandlerRegistry::new()
            .register(NodeKind::Start, Arc::new(NullHandler))
            .register(NodeKind::Exit, Arc::new(NullHandler))
            .register(NodeKind::Action, Arc::new(ScriptedHandler::new(script))),
    );

    let mut config = SchedulerConfig::default();
    config.signature_limit = 3;
    config.default_retry_policy = RetryPolicy::new(10).with_jitter(false).with_initial_interval(0.001);

    let scheduler = Scheduler::new(Arc::new(g), store.clone(), reg, "run-3", config);
    let final_outcome = scheduler.run().await.unwrap();
    assert_eq!(final_outcome.status, TerminalStatus::Fail);

    let contents = std::fs::read_to_string(dir.path().join("progress.ndjson")).unwrap();
    assert!(contents.contains("deterministic_failure_cycle_check"));
}

#[tokio::test]
async fn checkpoint_node_retries_equals_attempt_starts_minus_one() {
    let mut g = Graph::new();
    g.add_node(Node::new(START, NodeShape::StartMarker)).unwrap();
    g.add_node(Node::new("impl", NodeShape::Action).with_attr("llm_provider", "x"))
        .unwrap();
    g.add_node(Node::new("exit", NodeShape::ExitMarker)).unwrap();
    g.add_edge(Edge::new(START, "impl"));
    g.add_edge(Edge::new("impl", "exit"));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());

    let mut transient = Outcome::fail("connection reset");
    transient.failure_class = Some(FailureClass::TransientInfra);
    let script = vec![transient.clone(), transient, Outcome::success()];
    let reg = Arc::new(
        HandlerRegistry::new()
            .register(NodeKind::Start, Arc::new(NullHandler))
            .register(NodeKind::Exit, Arc::new(NullHandler))
            .register(NodeKind::Action, Arc::new(ScriptedHandler::new(script))),
    );

    let mut config = SchedulerConfig::default();
    config.default_retry_policy = RetryPolicy::new(5).with_jitter(false).with_initial_interval(0.001);

    let scheduler = Scheduler::new(Arc::new(g), store.clone(), reg, "run-retries", config);
    let final_outcome = scheduler.run().await.unwrap();
    assert_eq!(final_outcome.status, TerminalStatus::Success);

    let contents = std::fs::read_to_string(dir.path().join("progress.ndjson")).unwrap();
    let attempt_starts = contents
        .lines()
        .filter(|l| l.contains("stage_attempt_start") && l.contains("\"impl\""))
        .count();
    assert_eq!(attempt_starts, 3);

    let checkpoint = store.load_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.node_retries.get("impl"), Some(&2));
}

#[tokio::test]
async fn human_gate_blocks_until_answered_and_merges_the_answer_into_context() {
    let mut g = Graph::new();
    g.add_node(Node::new(START, NodeShape::StartMarker)).unwrap();
    g.add_node(Node::new("gate", NodeShape::Action).with_attr("human_gate", "true")).unwrap();
    g.add_node(Node::new("exit", NodeShape::ExitMarker)).unwrap();
    g.add_edge(Edge::new(START, "gate"));
    g.add_edge(Edge::new("gate", "exit"));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());
    let reg = registry(Arc::new(NullHandler));

    let scheduler =
        Arc::new(Scheduler::new(Arc::new(g), store.clone(), reg, "run-gate", SchedulerConfig::default()));
    let interviewer = scheduler.interviewer();

    let run_scheduler = scheduler.clone();
    let run_handle = tokio::spawn(async move { run_scheduler.run().await });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let pending = interviewer.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].node_id, "gate");
    assert!(interviewer.answer(&pending[0].id, "approved".to_string()));

    let final_outcome = run_handle.await.unwrap().unwrap();
    assert_eq!(final_outcome.status, TerminalStatus::Success);
    assert_eq!(
        scheduler.context().get("gate.answer"),
        Some(serde_json::Value::String("approved".to_string()))
    );
}

#[tokio::test]
async fn final_json_is_written_even_when_no_edge_matches() {
    let mut g = Graph::new();
    g.add_node(Node::new(START, NodeShape::StartMarker)).unwrap();
    g.add_node(Node::new("impl", NodeShape::Action).with_attr("llm_provider", "x"))
        .unwrap();
    g.add_node(Node::new("exit", NodeShape::ExitMarker)).unwrap();
    g.add_edge(Edge::new(START, "impl"));
    g.add_edge(Edge::new("impl", "exit").with_condition("outcome=never_matches"));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());
    let reg = registry(Arc::new(NullHandler));
    let scheduler = Scheduler::new(Arc::new(g), store.clone(), reg, "run-4", SchedulerConfig::default());
    let final_outcome = scheduler.run().await.unwrap();
    assert_eq!(final_outcome.status, TerminalStatus::Fail);
    assert!(final_outcome.failure_reason.unwrap().contains("no_matching_edge"));
    assert!(store.load_final().unwrap().is_some());
}
