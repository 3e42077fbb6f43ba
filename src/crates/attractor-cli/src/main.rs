//! `attractor`: launch, stop, and inspect pipeline runs from the command
//! line, plus a `serve` subcommand that exposes the same engine over HTTP.

mod config;
mod error;
mod graph_io;
mod handlers;
mod registry;
mod status_cmd;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use attractor_engine::Scheduler;
use attractor_store::{Manifest, RunStore};
use clap::{Parser, Subcommand};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "attractor")]
#[command(about = "Run, stop, and inspect Attractor pipeline runs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a pipeline run to completion.
    Run {
        /// Path to the graph's JSON definition.
        #[arg(long)]
        graph: PathBuf,

        /// Path to an optional TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run identifier; generated if omitted.
        #[arg(long)]
        run_id: Option<String>,

        /// Directory the run's artifacts are written under.
        #[arg(long)]
        logs_root: PathBuf,

        /// Re-exec in the background and return immediately.
        #[arg(long)]
        detach: bool,

        /// Run `action` nodes through the deterministic echo shim instead of
        /// refusing them (no LLM provider is wired into this binary).
        #[arg(long)]
        allow_test_shim: bool,
    },

    /// Signal a running pipeline to stop.
    Stop {
        #[arg(long)]
        logs_root: PathBuf,

        /// Grace period before escalating, in milliseconds.
        #[arg(long, default_value_t = 5_000)]
        grace_ms: u64,

        /// Escalate to SIGKILL if the grace period elapses.
        #[arg(long)]
        force: bool,
    },

    /// Print (or follow) a run's current status.
    Status {
        #[arg(long)]
        logs_root: PathBuf,

        /// Emit the snapshot as JSON instead of a human-readable line.
        #[arg(long)]
        json: bool,

        /// Stream new progress events as they're appended.
        #[arg(long, short = 'f')]
        follow: bool,

        /// Re-print the snapshot line on every poll until terminal.
        #[arg(long)]
        watch: bool,

        /// Treat `--logs-root` as a parent directory and pick the
        /// most-recently-modified run subdirectory within it.
        #[arg(long)]
        latest: bool,

        /// Poll interval in milliseconds for `--follow`/`--watch`.
        #[arg(long, default_value_t = 1_000)]
        interval: u64,
    },

    /// Run the HTTP submission server.
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Parent directory each accepted run gets its own subdirectory under.
        #[arg(long)]
        logs_root: PathBuf,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        allow_test_shim: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run { graph, config, run_id, logs_root, detach, allow_test_shim } => {
            if detach {
                detach_and_spawn(&graph, config.as_deref(), run_id.as_deref(), &logs_root, allow_test_shim)?
            } else {
                run_pipeline(graph, config, run_id, logs_root, allow_test_shim).await?
            }
        }
        Commands::Stop { logs_root, grace_ms, force } => stop_pipeline(logs_root, grace_ms, force).await?,
        Commands::Status { logs_root, json, follow, watch, latest, interval } => {
            status_cmd::run_status(status_cmd::StatusArgs {
                logs_root,
                json,
                follow,
                watch,
                latest,
                interval: Duration::from_millis(interval),
            })
            .await?
        }
        Commands::Serve { config, logs_root, host, port, allow_test_shim } => {
            serve(config, logs_root, host, port, allow_test_shim).await?
        }
    };

    std::process::exit(exit_code);
}

async fn run_pipeline(
    graph_path: PathBuf,
    config_path: Option<PathBuf>,
    run_id: Option<String>,
    logs_root: PathBuf,
    allow_test_shim: bool,
) -> anyhow::Result<i32> {
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let cli_config = CliConfig::load(config_path.as_deref())?;
    let graph = graph_io::load_graph(&graph_path)?;

    let store = Arc::new(RunStore::open(&logs_root)?);
    store.save_manifest(&Manifest {
        run_id: run_id.clone(),
        repo_root: String::new(),
        base_commit: None,
        run_branch: None,
        logs_root: logs_root.display().to_string(),
        graph_name: graph.attrs.get("name").cloned().unwrap_or_else(|| "unnamed".to_string()),
    })?;
    store.write_pid(std::process::id() as i32)?;

    let registry = registry::build_registry(allow_test_shim);
    let scheduler = Scheduler::new(graph, store.clone(), registry, run_id.clone(), cli_config.scheduler_config());

    tracing::info!(run_id = %run_id, logs_root = %logs_root.display(), "starting run");
    let outcome = scheduler.run().await?;
    tracing::info!(run_id = %run_id, status = ?outcome.status, "run finished");

    Ok(match outcome.status {
        attractor_store::TerminalStatus::Success => 0,
        attractor_store::TerminalStatus::Fail => 1,
    })
}

/// Re-execs this same binary as `attractor run ...` (minus `--detach`) with
/// its stdio redirected into the logs_root, so the supervisor's cmdline
/// identity check (`attractor run --run-id ...`) finds exactly what it
/// expects. The parent prints the child's run_id/pid and returns
/// immediately.
fn detach_and_spawn(
    graph: &std::path::Path,
    config: Option<&std::path::Path>,
    run_id: Option<&str>,
    logs_root: &std::path::Path,
    allow_test_shim: bool,
) -> anyhow::Result<i32> {
    std::fs::create_dir_all(logs_root)?;
    let run_id = run_id.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let exe = std::env::current_exe()?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("run")
        .arg("--graph")
        .arg(graph)
        .arg("--run-id")
        .arg(&run_id)
        .arg("--logs-root")
        .arg(logs_root);
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    if allow_test_shim {
        cmd.arg("--allow-test-shim");
    }

    let stdout = std::fs::File::create(logs_root.join("detached.stdout.log"))?;
    let stderr = std::fs::File::create(logs_root.join("detached.stderr.log"))?;
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(stdout);
    cmd.stderr(stderr);

    let child = cmd.spawn()?;
    println!("run_id={} pid={}", run_id, child.id());
    Ok(0)
}

async fn stop_pipeline(logs_root: PathBuf, grace_ms: u64, force: bool) -> anyhow::Result<i32> {
    let store = RunStore::open(&logs_root)?;
    let self_exe = std::env::current_exe()?;
    let backend = attractor_supervisor::default_process_info();
    let report =
        attractor_supervisor::stop(&store, backend.as_ref(), &self_exe, Duration::from_millis(grace_ms), force).await?;
    println!(
        "pid={} graceful={} forced={} synthesized_final={}",
        report.pid, report.graceful, report.forced, report.synthesized_final
    );
    Ok(0)
}

async fn serve(
    config_path: Option<PathBuf>,
    logs_root: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    allow_test_shim: bool,
) -> anyhow::Result<i32> {
    let cli_config = CliConfig::load(config_path.as_deref())?;
    let host = host.unwrap_or_else(|| cli_config.server_host());
    let port = port.unwrap_or_else(|| cli_config.server_port());

    std::fs::create_dir_all(&logs_root)?;
    let registry = registry::build_registry(allow_test_shim);
    let graph_loader: Arc<dyn attractor_server::GraphLoader> =
        Arc::new(attractor_server::StaticGraphLoader::new(placeholder_graph()));
    let mut state = attractor_server::AppState::new(logs_root, registry, graph_loader);
    state.scheduler_config = cli_config.scheduler_config();

    let addr: std::net::SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!(%addr, "submission server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, attractor_server::router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(0)
}

/// Waits for Ctrl-C or SIGTERM so an in-flight SSE stream gets to finish its
/// current frame instead of being cut off mid-response.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}

/// The server's `GraphLoader` boundary is a real DOT/config frontend plugged
/// in by a deployment; this binary ships only the static test-double graph
/// loader, matching the crate's own integration tests, until that frontend
/// exists.
fn placeholder_graph() -> Arc<attractor_core::Graph> {
    use attractor_core::{Edge, Graph, Node, NodeShape, START};
    let mut g = Graph::new();
    let _ = g.add_node(Node::new(START, NodeShape::StartMarker));
    let _ = g.add_node(Node::new("exit", NodeShape::ExitMarker));
    g.add_edge(Edge::new(START, "exit"));
    Arc::new(g)
}
