// =============================================================================
// Matrixon Homeserver Core - Shared Application State
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
//   The single Arc-wrapped AppState threaded through every handler via axum's 
//   State extractor: the object store handle, cron scheduler, rate limiter, and 
//   the shutdown/restart signalling used by the admin proc-control endpoint.
//
// Performance Targets:
//   • Shutdown propagation via a single watch channel, not polling
//
// Architecture:
//   • Explicit context object rather than ambient globally shared state
// =============================================================================

//! Process-wide shared state (§5, §9's "explicit context" decision).
//!
//! A single `Arc<AppState>` is threaded through axum's `State` extractor
//! into every handler. It owns the object store handle, the cron
//! scheduler, a snapshot of the server name (read once at boot; the
//! mutable parts of `Config` are re-read from the store per request
//! where they matter, e.g. `registration`/`federation` toggles), and the
//! rate limiter.

use crate::ratelimit::RateLimiter;
use matrixon_core::Config;
use matrixon_db::ObjectStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

pub struct AppState {
    pub store: Arc<ObjectStore>,
    pub cron: matrixon_core::Cron,
    pub server_name: String,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
    restart: AtomicBool,
}

impl AppState {
    pub fn new(store: ObjectStore, config: &Config, cron: matrixon_core::Cron) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        AppState {
            store: Arc::new(store),
            cron,
            server_name: config.server_name.clone(),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            started_at: Instant::now(),
            shutdown_tx,
            restart: AtomicBool::new(false),
        }
    }

    /// Re-read the live `Config` document. Called per-request by
    /// handlers that need the current `registration`/`federation`
    /// toggles rather than the boot-time snapshot.
    pub fn current_config(&self) -> Result<Config, matrixon_db::StoreError> {
        let (config, obj) = matrixon_core::config::lock(&self.store)?;
        obj.discard()?;
        Ok(config)
    }

    /// Ask the server to stop serving. `src/main.rs`'s main loop is the
    /// only reader: it watches [`AppState::shutdown_signal`] alongside
    /// the OS signal handler and, once either fires, drains listeners
    /// the same way.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Like [`AppState::request_shutdown`], but also marks the process
    /// for re-exec once it has drained (§4.10 scenario 5: "server
    /// restart is triggered").
    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn is_restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    /// A future that resolves once shutdown has been requested, from
    /// any source (OS signal or the admin proc-control endpoint). Each
    /// call returns an independent subscription, so every listener task
    /// can hold its own copy to pass to `axum::serve`'s graceful
    /// shutdown.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}
