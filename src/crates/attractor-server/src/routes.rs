//! The submission server's HTTP surface: submit, query,
//! cancel, SSE progress, and human-gate Q&A, all keyed by `run_id`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};

use attractor_engine::Scheduler;
use attractor_store::{load_snapshot, RunState, Snapshot};

use crate::error::{ApiError, Result};
use crate::graph_loader::GraphLoader;
use crate::state::{AppState, RunHandle};
use crate::tail::{tail_progress, DEFAULT_POLL_INTERVAL};

static RUN_ID_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").unwrap());

/// `POST /pipelines` request body. Exactly one of `dot_source` /
/// `dot_source_path` is required alongside `config_path`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub dot_source: Option<String>,
    pub dot_source_path: Option<String>,
    pub config_path: String,
    pub run_id: Option<String>,
    #[serde(default)]
    pub force_models: HashMap<String, String>,
    #[serde(default)]
    pub allow_test_shim: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub run_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pipeline_count: usize,
}

#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub run_id: String,
    pub state: RunState,
    pub current_node_id: Option<String>,
    pub last_event: Option<String>,
    pub last_event_at: Option<String>,
    pub failure_reason: Option<String>,
    pub pid: Option<i32>,
    pub pid_alive: bool,
}

impl From<Snapshot> for PipelineStatus {
    fn from(s: Snapshot) -> Self {
        Self {
            run_id: s.run_id.unwrap_or_default(),
            state: s.state,
            current_node_id: s.current_node_id,
            last_event: s.last_event,
            last_event_at: s.last_event_at,
            failure_reason: s.failure_reason,
            pid: s.pid,
            pid_alive: s.pid_alive,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnswerBody {
    pub answer: String,
}

/// Restricted to localhost-family origins, matching the CSRF middleware's
/// own notion of "local" so the two layers never disagree. Requests with no
/// `Origin` header (CLI/script callers) are unaffected by CORS either way.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| crate::csrf::is_localhost_origin(origin)))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pipelines", post(submit))
        .route("/pipelines/:id", get(status))
        .route("/pipelines/:id/events", get(events))
        .route("/pipelines/:id/cancel", post(cancel))
        .route("/pipelines/:id/context", get(context))
        .route("/pipelines/:id/questions", get(questions))
        .route("/pipelines/:id/questions/:qid/answer", post(answer))
        .layer(axum::middleware::from_fn(crate::csrf::enforce_local_origin))
        .layer(cors_layer())
        .with_state(state)
}

fn validate_run_id(run_id: &str) -> Result<()> {
    if !RUN_ID_RE.is_match(run_id) || run_id.contains("..") || run_id.contains('/') {
        return Err(ApiError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        pipeline_count: state.runs.len(),
    })
}

async fn submit(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> Result<impl IntoResponse> {
    if req.dot_source.is_some() == req.dot_source_path.is_some() {
        return Err(ApiError::BadRequest(
            "submit body must contain exactly one of dot_source / dot_source_path".into(),
        ));
    }

    let run_id = match &req.run_id {
        Some(id) => {
            validate_run_id(id)?;
            if state.runs.contains_key(id) {
                return Err(ApiError::BadRequest(format!("run_id '{id}' already submitted")));
            }
            id.clone()
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    let graph = state.graph_loader.load(&req).await?;
    attractor_core::validate_or_error(&graph)?;

    let logs_root = state.run_logs_root(&run_id);
    let store = Arc::new(attractor_store::RunStore::open(&logs_root)?);
    store.save_manifest(&attractor_store::Manifest {
        run_id: run_id.clone(),
        repo_root: String::new(),
        base_commit: None,
        run_branch: None,
        logs_root: logs_root.display().to_string(),
        graph_name: graph.attrs.get("name").cloned().unwrap_or_else(|| "unnamed".to_string()),
    })?;
    store.write_pid(std::process::id() as i32)?;

    let scheduler = Arc::new(Scheduler::new(
        graph,
        store.clone(),
        state.registry.clone(),
        run_id.clone(),
        state.scheduler_config.clone(),
    ));

    let broadcaster = Arc::new(crate::broadcaster::RunBroadcaster::new());
    tokio::spawn(tail_progress(store.clone(), broadcaster.clone(), DEFAULT_POLL_INTERVAL));

    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                tracing::error!(error = %e, "scheduler run exited with an error");
            }
        });
    }

    let handle = Arc::new(RunHandle {
        run_id: run_id.clone(),
        logs_root,
        store,
        scheduler,
        broadcaster,
    });
    state.runs.insert(run_id.clone(), handle);

    Ok(Json(SubmitResponse { run_id, status: "accepted" }))
}

fn find_run(state: &AppState, id: &str) -> Result<Arc<RunHandle>> {
    validate_run_id(id)?;
    state.runs.get(id).map(|r| r.clone()).ok_or_else(|| ApiError::RunNotFound(id.to_string()))
}

async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let run = find_run(&state, &id)?;
    let snapshot = load_snapshot(&run.store)?;
    Ok(Json(PipelineStatus::from(snapshot)))
}

async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let run = find_run(&state, &id)?;
    run.scheduler.cancel();
    Ok(Json(serde_json::json!({ "run_id": id, "status": "cancelling" })))
}

async fn context(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let run = find_run(&state, &id)?;
    let snapshot: HashMap<String, Value> = run.scheduler.context().snapshot();
    Ok(Json(snapshot))
}

async fn questions(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let run = find_run(&state, &id)?;
    Ok(Json(run.scheduler.interviewer().pending()))
}

async fn answer(
    State(state): State<AppState>,
    Path((id, qid)): Path<(String, String)>,
    Json(body): Json<AnswerBody>,
) -> Result<impl IntoResponse> {
    let run = find_run(&state, &id)?;
    if run.scheduler.interviewer().answer(&qid, body.answer) {
        Ok(Json(serde_json::json!({ "delivered": true })))
    } else {
        Err(ApiError::QuestionNotFound(qid))
    }
}

/// `GET /pipelines/{id}/events`: replays every event already published for
/// this run, then streams live events until the broadcaster closes.
/// A lagging subscriber is disconnected by the
/// underlying broadcast channel (`RecvError::Lagged`) without affecting
/// other subscribers or the broadcaster itself.
async fn events(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse> {
    let run = find_run(&state, &id)?;
    let broadcaster = run.broadcaster.clone();

    let history = broadcaster.history();
    let mut live_rx = broadcaster.subscribe();
    let mut closed_rx = broadcaster.closed_signal();
    let was_closed_at_subscribe = broadcaster.is_closed();

    let stream = async_stream::stream! {
        for event in history {
            yield Ok(sse_data(&event));
        }

        if was_closed_at_subscribe {
            yield Ok(Event::default().event("done").data("{}"));
            return;
        }

        loop {
            tokio::select! {
                recv = live_rx.recv() => match recv {
                    Ok(event) => yield Ok(sse_data(&event)),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => return,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        yield Ok(Event::default().event("done").data("{}"));
                        return;
                    }
                },
                _ = closed_rx.changed() => {
                    // Drain whatever the close-triggering publish already
                    // queued before announcing done.
                    while let Ok(event) = live_rx.try_recv() {
                        yield Ok(sse_data(&event));
                    }
                    yield Ok(Event::default().event("done").data("{}"));
                    return;
                }
            }
        }
    };

    let sse = Sse::new(stream).keep_alive(KeepAlive::default());
    let extra_headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((extra_headers, sse))
}

fn sse_data(event: &attractor_store::ProgressEvent) -> Event {
    Event::default().data(serde_json::to_string(event).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use attractor_core::{Edge, Graph, Node, NodeShape, START};
    use attractor_engine::{HandlerRegistry, NodeKind, NullHandler};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::graph_loader::StaticGraphLoader;

    fn linear_graph() -> Arc<Graph> {
        let mut g = Graph::new();
        g.add_node(Node::new(START, NodeShape::StartMarker)).unwrap();
        g.add_node(Node::new("exit", NodeShape::ExitMarker)).unwrap();
        g.add_edge(Edge::new(START, "exit"));
        Arc::new(g)
    }

    fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            HandlerRegistry::new()
                .register(NodeKind::Start, Arc::new(NullHandler))
                .register(NodeKind::Exit, Arc::new(NullHandler)),
        );
        let loader = Arc::new(StaticGraphLoader::new(linear_graph()));
        let state = AppState::new(dir.path().to_path_buf(), registry, loader);
        (router(state), dir)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn submit_body() -> serde_json::Value {
        serde_json::json!({
            "dot_source": "digraph { start -> exit }",
            "config_path": "unused.toml",
        })
    }

    #[tokio::test]
    async fn health_reports_zero_pipelines_before_any_submission() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pipeline_count"], 0);
    }

    #[tokio::test]
    async fn submit_then_status_reaches_a_terminal_success() {
        let (app, _dir) = test_app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pipelines")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(submit_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let run_id = body["run_id"].as_str().unwrap().to_string();
        assert_eq!(body["status"], "accepted");

        let mut last_state = serde_json::Value::Null;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/pipelines/{run_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            last_state = body["state"].clone();
            if last_state == "success" || last_state == "fail" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last_state, "success");
    }

    #[tokio::test]
    async fn submit_rejects_a_body_with_neither_or_both_dot_sources() {
        let (app, _dir) = test_app();
        let bad = serde_json::json!({ "config_path": "unused.toml" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pipelines")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(bad.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_rejects_an_explicit_run_id_that_fails_the_pattern() {
        let (app, _dir) = test_app();
        let mut bad = submit_body();
        bad["run_id"] = serde_json::json!("../escape");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pipelines")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(bad.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_for_an_unknown_run_id_is_not_found() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/pipelines/never-submitted")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn a_cross_origin_post_is_rejected_before_it_reaches_the_handler() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pipelines")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .body(Body::from(submit_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cors_preflight_echoes_a_localhost_origin_but_not_a_foreign_one() {
        let (app, _dir) = test_app();

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/pipelines/some-run")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()),
            Some("http://localhost:3000")
        );

        let foreign = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/pipelines/some-run")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(foreign.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn events_replays_history_then_terminates_with_done_once_the_run_finishes() {
        let (app, _dir) = test_app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/pipelines")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(submit_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let run_id = body["run_id"].as_str().unwrap().to_string();

        // Give the scheduler a moment to terminalize and close the
        // broadcaster before subscribing, exercising the
        // already-closed-at-subscribe replay path.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/pipelines/{run_id}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some("no-cache")
        );
        assert_eq!(
            response.headers().get("x-accel-buffering").and_then(|v| v.to_str().ok()),
            Some("no")
        );
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .starts_with("text/event-stream"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: done"));
    }
}
