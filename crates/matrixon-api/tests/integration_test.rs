// =============================================================================
// Matrixon Homeserver Core - End-to-End Scenario Tests
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
//   Drives build_app end to end against a tempfile-backed object store with 
//   tower::ServiceExt::oneshot, covering the documented client-visible scenarios 
//   with no real TCP listener involved.
//
// Performance Targets:
//   • Each scenario runs against an isolated temporary store
//
// Architecture:
//   • No network I/O: requests go straight through the axum Service
// =============================================================================

//! End-to-end scenarios (§8), driven against `build_app` with a
//! `tempfile`-backed object store and no real TCP listener
//! (`tower::ServiceExt::oneshot`).

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use matrixon_api::build_app;
use matrixon_api::state::AppState;
use matrixon_core::Cron;
use matrixon_db::ObjectStore;
use matrixon_users::user;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

fn new_state(configure: impl FnOnce(&mut matrixon_core::Config)) -> (tempfile::TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().unwrap();
    let store = ObjectStore::open(dir.path()).unwrap();
    let (mut config, obj) = matrixon_core::config::lock(&store).unwrap();
    configure(&mut config);
    matrixon_core::config::unlock(obj, &config).unwrap();
    let state = Arc::new(AppState::new(store, &config, Cron::new()));
    (dir, state)
}

async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let bytes = body.map(|b| b.to_string()).unwrap_or_default();
    let mut req = builder.body(Body::from(bytes)).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };
    (status, value)
}

/// Scenario 1: register + whoami.
#[tokio::test]
async fn register_then_whoami() {
    let (_dir, state) = new_state(|c| c.registration = true);
    let app = build_app(state);

    let (status, body) = request(&app, "POST", "/_matrix/client/v3/register", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let session = body["session"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v3/register",
        None,
        Some(json!({
            "auth": {"type": "m.login.dummy", "session": session},
            "username": "alice",
            "password": "hunter2",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["user_id"].as_str().unwrap().starts_with("@alice:"));
    let token = body["access_token"].as_str().unwrap().to_string();
    let device_id = body["device_id"].as_str().unwrap().to_string();

    let (status, body) = request(&app, "GET", "/_matrix/client/v3/account/whoami", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["user_id"].as_str().unwrap().starts_with("@alice:"));
    assert_eq!(body["device_id"], json!(device_id));
}

/// Scenario 2: refresh rotation invalidates the prior access token and
/// can be repeated.
#[tokio::test]
async fn refresh_rotates_the_access_token() {
    let (_dir, state) = new_state(|_| {});
    user::create(&state.store, "alice", "hunter2", matrixon_core::Privileges::NONE).unwrap();
    let app = build_app(state);

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v3/login",
        None,
        Some(json!({
            "type": "m.login.password",
            "identifier": {"user": "alice"},
            "password": "hunter2",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access_a = body["access_token"].as_str().unwrap().to_string();
    let refresh_r = body["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v3/refresh",
        None,
        Some(json!({"refresh_token": refresh_r})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access_a_prime = body["access_token"].as_str().unwrap().to_string();
    assert_ne!(access_a, access_a_prime);

    let (status, _) = request(&app, "GET", "/_matrix/client/v3/account/whoami", Some(&access_a), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v3/refresh",
        None,
        Some(json!({"refresh_token": refresh_r})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access_a_double_prime = body["access_token"].as_str().unwrap().to_string();
    assert_ne!(access_a_double_prime, access_a_prime);
}

/// Scenario 3: changing the password with `logout_devices` revokes
/// every other device's token but not the one making the request.
#[tokio::test]
async fn password_change_logs_out_other_devices() {
    let (_dir, state) = new_state(|_| {});
    user::create(&state.store, "alice", "hunter2", matrixon_core::Privileges::NONE).unwrap();
    let app = build_app(state);

    let login = |device_id: &'static str| {
        let app = app.clone();
        async move {
            let (_, body) = request(
                &app,
                "POST",
                "/_matrix/client/v3/login",
                None,
                Some(json!({
                    "type": "m.login.password",
                    "identifier": {"user": "alice"},
                    "password": "hunter2",
                    "device_id": device_id,
                })),
            )
            .await;
            body["access_token"].as_str().unwrap().to_string()
        }
    };
    let token_1 = login("DEVICE1").await;
    let token_2 = login("DEVICE2").await;

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v3/account/password",
        Some(&token_1),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let session = body["session"].as_str().unwrap().to_string();

    let (status, _) = request(
        &app,
        "POST",
        "/_matrix/client/v3/account/password",
        Some(&token_1),
        Some(json!({
            "auth": {
                "type": "m.login.password",
                "session": session,
                "identifier": {"user": "alice"},
                "password": "hunter2",
            },
            "new_password": "hunter3",
            "logout_devices": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&app, "GET", "/_matrix/client/v3/account/whoami", Some(&token_1), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, "GET", "/_matrix/client/v3/account/whoami", Some(&token_2), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(
        &app,
        "POST",
        "/_matrix/client/v3/login",
        None,
        Some(json!({"type": "m.login.password", "identifier": {"user": "alice"}, "password": "hunter2"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app,
        "POST",
        "/_matrix/client/v3/login",
        None,
        Some(json!({"type": "m.login.password", "identifier": {"user": "alice"}, "password": "hunter3"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

/// Scenario 4: a registration token with `uses=2` admits exactly two
/// registrations before failing the UIA stage.
#[tokio::test]
async fn registration_token_exhausts_after_its_use_count() {
    let (_dir, state) = new_state(|_| {});
    matrixon_users::token::create_registration_token(
        &state.store,
        "welcome",
        None,
        0,
        2,
        matrixon_core::Privileges::NONE,
    )
    .unwrap();
    let app = build_app(state);

    let register_with_token = |username: &'static str| {
        let app = app.clone();
        async move {
            let (_, body) =
                request(&app, "POST", "/_matrix/client/v3/register", None, Some(json!({}))).await;
            let session = body["session"].as_str().unwrap().to_string();
            request(
                &app,
                "POST",
                "/_matrix/client/v3/register",
                None,
                Some(json!({
                    "auth": {
                        "type": "m.login.registration_token",
                        "session": session,
                        "token": "welcome",
                    },
                    "username": username,
                    "password": "hunter2",
                })),
            )
            .await
        }
    };

    let (status, _) = register_with_token("alice").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = register_with_token("bob").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = register_with_token("carol").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errcode"], "M_FORBIDDEN");
}

/// Companion to the scenario-4 test: the validity-probe endpoint
/// reflects exhaustion once the store-level `used` counter reaches
/// `uses`.
#[tokio::test]
async fn registration_token_validity_probe_reflects_exhaustion() {
    let (_dir, state) = new_state(|_| {});
    matrixon_users::token::create_registration_token(
        &state.store,
        "welcome",
        None,
        0,
        1,
        matrixon_core::Privileges::NONE,
    )
    .unwrap();
    let app = build_app(state.clone());

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v1/register/m.login.registration_token/validity",
        None,
        Some(json!({"token": "welcome"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], json!(true));

    matrixon_users::token::use_registration_token(&state.store, "welcome").unwrap();

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v1/register/m.login.registration_token/validity",
        None,
        Some(json!({"token": "welcome"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], json!(false));
}

/// Scenario 5: an unprivileged user is forbidden from process control;
/// an admin with `PROC_CONTROL` succeeds.
#[tokio::test]
async fn admin_proc_control_is_privilege_gated() {
    let (_dir, state) = new_state(|_| {});
    user::create(&state.store, "bob", "hunter2", matrixon_core::Privileges::NONE).unwrap();
    user::create(
        &state.store,
        "admin",
        "hunter2",
        matrixon_core::Privileges::PROC_CONTROL,
    )
    .unwrap();
    let app = build_app(state);

    let login = |username: &'static str| {
        let app = app.clone();
        async move {
            let (_, body) = request(
                &app,
                "POST",
                "/_matrix/client/v3/login",
                None,
                Some(json!({"type": "m.login.password", "identifier": {"user": username}, "password": "hunter2"})),
            )
            .await;
            body["access_token"].as_str().unwrap().to_string()
        }
    };
    let bob_token = login("bob").await;
    let admin_token = login("admin").await;

    let (status, body) = request(
        &app,
        "POST",
        "/_matrix/client/v3/admin/proc/restart",
        Some(&bob_token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errcode"], "M_FORBIDDEN");

    let (status, _) = request(
        &app,
        "POST",
        "/_matrix/client/v3/admin/proc/restart",
        Some(&admin_token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

/// `GET /.well-known/matrix/client` and `/_matrix/client/versions` are
/// reachable without auth and return the shapes §6/§4.10 name.
#[tokio::test]
async fn well_known_and_versions_are_unauthenticated() {
    let (_dir, state) = new_state(|_| {});
    let app = build_app(state);

    let (status, body) = request(&app, "GET", "/.well-known/matrix/client", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["m.homeserver"]["base_url"].is_string());

    let (status, body) = request(&app, "GET", "/_matrix/client/versions", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["versions"].as_array().unwrap().contains(&json!("v1.11")));
}

/// An unrecognized path falls through the whole router with
/// `M_UNRECOGNIZED` rather than a bare 404.
#[tokio::test]
async fn unknown_path_is_unrecognized() {
    let (_dir, state) = new_state(|_| {});
    let app = build_app(state);
    let (status, body) = request(&app, "GET", "/_matrix/client/v3/not/a/real/route", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errcode"], "M_UNRECOGNIZED");
}
