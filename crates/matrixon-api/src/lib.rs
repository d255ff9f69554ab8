// =============================================================================
// Matrixon Homeserver Core - Client-Server API Dispatch Pipeline
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
//   The single fallback handler every request flows through: extracts method, 
//   headers, query and body, checks the rate limiter, resolves a route, verifies 
//   the method, and runs the matched handler off the async executor.
//
// Performance Targets:
//   • O(depth) route resolution via the regex-per-segment router
//   • Blocking handler I/O isolated with tokio::task::spawn_blocking
//
// Architecture:
//   • axum::Router with one catch-all fallback instead of per-route macros
//   • Handlers are plain sync fn(&HandlerCtx, &[String]) -> HandlerResult
// =============================================================================

//! The Matrix Client-Server API surface (§4.9, §4.10): a regex-
//! per-segment router dispatching to handlers that compose the lower
//! crates (object store, identifiers, tokens, users, UIA) into the
//! ~30-endpoint core named in §4.10.
//!
//! [`build_app`] wires this dispatch pipeline into an `axum::Router`
//! for `src/main.rs` to serve; everything else in this crate is plain,
//! synchronous Rust deliberately kept free of axum types so it stays
//! testable without spinning up a server.

pub mod auth;
pub mod ctx;
pub mod filter;
pub mod handlers;
pub mod ratelimit;
pub mod router;
pub mod state;
pub mod uia;

use crate::ctx::HandlerCtx;
use crate::router::Router;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use matrixon_common::{ErrorKind, MatrixError};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tower_http::trace::TraceLayer;

pub type HandlerFn = fn(&HandlerCtx, &[String]) -> ctx::HandlerResult;

/// One path pattern's method table: §4.10 step 1 ("verifies
/// method; non-matching method -> `400 M_UNRECOGNIZED`") is enforced
/// here rather than in the router itself, since the router (§4.9) is
/// specified purely in terms of path segments.
struct RouteEntry {
    methods: Vec<(Method, HandlerFn)>,
}

impl RouteEntry {
    fn handler_for(&self, method: &Method) -> Option<HandlerFn> {
        self.methods.iter().find(|(m, _)| m == method).map(|(_, h)| *h)
    }
}

fn route_table() -> Vec<(&'static str, Method, HandlerFn)> {
    use handlers::*;
    vec![
        (r"_matrix/client/v3/login", Method::GET, login::get),
        (r"_matrix/client/v3/login", Method::POST, login::post),
        (r"_matrix/client/v3/logout", Method::POST, logout::logout),
        (r"_matrix/client/v3/logout/all", Method::POST, logout::logout_all),
        (r"_matrix/client/v3/register", Method::POST, register::post),
        (
            r"_matrix/client/v1/register/m\.login\.registration_token/validity",
            Method::POST,
            register::token_validity,
        ),
        (r"_matrix/client/v3/refresh", Method::POST, refresh::refresh),
        (r"_matrix/client/v3/account/password", Method::POST, account::password),
        (r"_matrix/client/v3/account/deactivate", Method::POST, account::deactivate),
        (r"_matrix/client/v3/account/whoami", Method::GET, account::whoami),
        (r"_matrix/client/v3/user/([^/]+)/filter", Method::POST, user_filter::create),
        (r"_matrix/client/v3/user/([^/]+)/filter/([^/]+)", Method::GET, user_filter::get),
        (r"_matrix/client/v3/user_directory/search", Method::POST, directory::search),
        (r"_matrix/client/v3/capabilities", Method::GET, capabilities::capabilities),
        (r"_matrix/client/versions", Method::GET, capabilities::versions),
        (r"\.well-known/matrix/client", Method::GET, directory::well_known_client),
        (r"\.well-known/matrix/server", Method::GET, directory::well_known_server),
        (
            r"_matrix/client/v3/admin/deactivate/([^/]+)",
            Method::DELETE,
            admin::deactivate_user,
        ),
        (
            r"_matrix/client/v3/admin/deactivate/([^/]+)",
            Method::PUT,
            admin::deactivate_user,
        ),
        (r"_matrix/client/v3/admin/privileges", Method::GET, admin::get_privileges),
        (r"_matrix/client/v3/admin/privileges/([^/]+)", Method::GET, admin::get_privileges),
        (r"_matrix/client/v3/admin/privileges", Method::POST, admin::set_privileges),
        (r"_matrix/client/v3/admin/privileges/([^/]+)", Method::POST, admin::set_privileges),
        (r"_matrix/client/v3/admin/privileges", Method::PUT, admin::add_privileges),
        (r"_matrix/client/v3/admin/privileges/([^/]+)", Method::PUT, admin::add_privileges),
        (r"_matrix/client/v3/admin/privileges", Method::DELETE, admin::remove_privileges),
        (
            r"_matrix/client/v3/admin/privileges/([^/]+)",
            Method::DELETE,
            admin::remove_privileges,
        ),
        (
            r"_matrix/client/v3/admin/proc/(restart|shutdown|stats)",
            Method::POST,
            admin::proc,
        ),
        (r"_matrix/static/(.*)", Method::GET, static_assets::serve),
    ]
}

fn build_router() -> Router<RouteEntry> {
    let mut grouped: Vec<(&'static str, RouteEntry)> = Vec::new();
    for (pattern, method, handler) in route_table() {
        match grouped.iter_mut().find(|(p, _)| *p == pattern) {
            Some((_, entry)) => entry.methods.push((method, handler)),
            None => grouped.push((pattern, RouteEntry { methods: vec![(method, handler)] })),
        }
    }
    let mut router = Router::new();
    for (pattern, entry) in grouped {
        router
            .add(pattern, entry)
            .expect("every registered route pattern is a valid regex");
    }
    router
}

fn shared_router() -> &'static Router<RouteEntry> {
    static ROUTER: OnceLock<Router<RouteEntry>> = OnceLock::new();
    ROUTER.get_or_init(build_router)
}

/// Request body size cap (§6): exceeding this is `413 M_TOO_LARGE`
/// before the body is even parsed as JSON.
const MAX_BODY_BYTES: usize = 1024 * 1024;

fn render_error(err: &MatrixError) -> Response {
    let body = Json(serde_json::json!({"errcode": err.errcode, "error": err.error}));
    (err.status(), body).into_response()
}

fn render_ok(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// The single entry point every request flows through: extract method,
/// headers, query and body, consult the rate limiter, route by path,
/// check the matched route's method, and invoke the handler (§4.10's
/// per-handler step list, minus steps each handler performs
/// itself: token extraction and body-schema validation).
async fn dispatch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let query: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let peer = addr.ip().to_string();
    if !state.rate_limiter.check(&peer) {
        return render_error(&MatrixError::new(ErrorKind::LimitExceeded));
    }

    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return render_error(&MatrixError::new(ErrorKind::TooLarge)),
    };

    let Some((entry, captures)) = shared_router().route(&path) else {
        return render_error(&MatrixError::new(ErrorKind::Unrecognized));
    };
    let Some(handler) = entry.handler_for(&parts.method) else {
        return render_error(&MatrixError::with_message(
            ErrorKind::Unrecognized,
            "method not supported on this endpoint",
        ));
    };

    let ctx = HandlerCtx {
        state: state.clone(),
        method: parts.method.clone(),
        headers: parts.headers.clone(),
        query,
        body_bytes,
        peer,
    };

    // Handlers do synchronous, flock-guarded object-store I/O; running
    // one inline here would stall every other request on this worker
    // thread for as long as the lock takes to acquire.
    let outcome = tokio::task::spawn_blocking(move || handler(&ctx, &captures)).await;
    match outcome {
        Ok(Ok((status, body))) => render_ok(status, body),
        Ok(Err(err)) => {
            if err.kind == ErrorKind::Unknown {
                tracing::error!(path, errcode = err.errcode, "internal error handling request");
            }
            render_error(&err)
        }
        Err(_join_error) => {
            tracing::error!(path, "handler task panicked");
            render_error(&MatrixError::new(ErrorKind::Unknown))
        }
    }
}

/// Build the axum application: every path falls through to [`dispatch`],
/// which owns routing itself (§4.9) rather than delegating to
/// axum's own path router — the regex-per-segment tree with its
/// documented insertion-order precedence is part of the specified
/// behavior, not an implementation detail axum's router happens to
/// also provide.
pub fn build_app(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
