// =============================================================================
// Matrixon Homeserver Core - Entry Point
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   Process bootstrap: opens the object store, loads the config singleton, sizes 
//   a worker-thread runtime from the configured listeners, starts the cron 
//   scheduler, and serves the Client-Server API until a shutdown signal (OS or 
//   admin-triggered) drains every listener.
//
// Performance Targets:
//   • Runtime worker count tracks Config.listen[i].threads
//   • Per-listener concurrency bounded by Config.listen[i].maxConnections
//   • Graceful shutdown: in-flight requests finish before exit
//
// Architecture:
//   • Multi-threaded tokio runtime built before any listener binds
//   • axum::serve per configured listener, one task each
//   • tower::limit::ConcurrencyLimitLayer bounds concurrent requests
//   • Admin restart re-execs the process in place once drained
// =============================================================================

//! Matrixon: the homeserver core's entry point.
//!
//! Opens the object store, seeds (or loads) the `config` singleton,
//! builds a worker-thread-sized `tokio` runtime, starts the cron
//! scheduler with its standing jobs, and serves the Client-Server API
//! on every configured listener until a shutdown signal arrives (an OS
//! signal or the admin proc-control endpoint). Blocking object-store
//! I/O happens off this runtime's async tasks, via
//! `tokio::task::spawn_blocking` inside `matrixon-api`'s dispatcher.

use clap::Parser;
use matrixon_api::state::AppState;
use matrixon_core::{config, Cron};
use matrixon_db::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tracing_subscriber::EnvFilter;

const CRON_TICK: Duration = Duration::from_secs(30);
const TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const UIA_CLEANUP_INTERVAL: Duration = Duration::from_secs(900);

#[derive(Parser, Debug)]
#[command(name = "matrixon", about = "A Matrix homeserver core", version)]
struct Cli {
    /// Directory the object store reads and writes its JSON documents in.
    #[arg(long, env = "MATRIXON_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Increase log verbosity; repeatable (-v, -vv). Overrides the
    /// persisted `config.log.level` when present.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(cli_verbosity: u8, configured: &str) {
    let directive = match cli_verbosity {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let store = ObjectStore::open(&cli.data_dir)?;
    let (config, obj) = config::lock(&store)?;
    config::unlock(obj, &config)?;

    init_tracing(cli.verbose, config.log.level.as_env_filter());
    tracing::info!(server_name = %config.server_name, data_dir = %cli.data_dir.display(), "starting matrixon");

    if config.listen.iter().any(|l| l.tls.is_some()) {
        tracing::warn!(
            "a listener configures TLS, but this core terminates plaintext HTTP only; \
             put a TLS-terminating reverse proxy in front of it"
        );
    }

    // Size the runtime from the busiest configured listener: each
    // listener's own accept loop runs as a task on this same pool, so
    // one worker count has to cover all of them.
    let worker_threads = config
        .listen
        .iter()
        .map(|l| l.threads as usize)
        .max()
        .unwrap_or(4)
        .max(1);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    let restart_requested = runtime.block_on(run(store, config))?;
    // Drop the runtime before re-exec so in-flight blocking tasks and
    // the listener sockets are torn down first.
    drop(runtime);

    if restart_requested {
        tracing::info!("restart requested, re-executing");
        exec_restart()?;
    }
    Ok(())
}

async fn run(store: ObjectStore, config: matrixon_core::Config) -> anyhow::Result<bool> {
    let cron = Cron::new();
    let state = Arc::new(AppState::new(store, &config, cron.clone()));
    register_cron_jobs(&cron, state.store.clone());

    let app = matrixon_api::build_app(state.clone());

    let cron_handle = tokio::spawn(cron.clone().run(CRON_TICK));

    let mut listener_handles = Vec::new();
    for listen in &config.listen {
        let addr = format!("0.0.0.0:{}", listen.port);
        let tcp = TcpListener::bind(&addr).await?;
        tracing::info!(%addr, max_connections = listen.max_connections, "listening");
        let app = app
            .clone()
            .layer(ConcurrencyLimitLayer::new(listen.max_connections as usize));
        let shutdown = state.shutdown_signal();
        listener_handles.push(tokio::spawn(async move {
            let result = axum::serve(tcp, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
                .with_graceful_shutdown(shutdown)
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "listener exited with an error");
            }
        }));
    }

    tokio::select! {
        _ = os_shutdown_signal() => tracing::info!("os shutdown signal received, draining connections"),
        _ = state.shutdown_signal() => tracing::info!("shutdown requested via admin endpoint, draining connections"),
    }
    // Idempotent: makes sure every listener's graceful-shutdown future
    // wakes even when the OS signal, not the admin endpoint, is what
    // got us here.
    state.request_shutdown();

    // Each listener's `with_graceful_shutdown` lets in-flight requests
    // finish naturally before its `axum::serve` future resolves; no
    // abort() here.
    for handle in listener_handles {
        let _ = handle.await;
    }

    cron.stop();
    let _ = cron_handle.await;

    Ok(state.is_restart_requested())
}

/// Re-exec the current binary with its original arguments, replacing
/// this process image, so an admin-triggered restart (§4.10 scenario
/// 5) actually restarts the server rather than just stopping it.
#[cfg(unix)]
fn exec_restart() -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;
    let exe = std::env::current_exe()?;
    let args: Vec<_> = std::env::args_os().skip(1).collect();
    let err = std::process::Command::new(exe).args(args).exec();
    Err(anyhow::anyhow!("failed to re-exec for restart: {err}"))
}

#[cfg(not(unix))]
fn exec_restart() -> anyhow::Result<()> {
    tracing::warn!("restart requested, but re-exec is only implemented on unix; exiting instead");
    Ok(())
}

/// Register the standing background jobs (§4.11): periodic token
/// and UIA-session cleanup. Both run synchronously on the cron task;
/// neither touches anything guarded by the HTTP dispatch pipeline's
/// own locks long enough to matter.
fn register_cron_jobs(cron: &Cron, store: Arc<ObjectStore>) {
    let token_store = store.clone();
    cron.schedule_every("token.cleanup", TOKEN_CLEANUP_INTERVAL, move || {
        match matrixon_users::token::cleanup_expired(&token_store) {
            Ok(removed) if removed > 0 => tracing::info!(removed, "swept expired access tokens"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "token cleanup failed"),
        }
    });

    let uia_store = store;
    cron.schedule_every("uia.cleanup", UIA_CLEANUP_INTERVAL, move || {
        matrixon_api::uia::cleanup_all(&uia_store);
    });
}

/// Resolve once either a Ctrl-C or (on Unix) a SIGTERM is observed.
async fn os_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
