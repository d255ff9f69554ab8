// =============================================================================
// Matrixon Homeserver Core - Login Endpoint
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
//   GET advertises the supported login flows; POST authenticates 
//   m.login.password and mints an access+refresh token pair.
//
// Performance Targets:
//   • One user-record lock per login attempt
//
// Architecture:
//   • Only m.login.password is supported; no SSO or third-party identifiers
// =============================================================================

//! `GET|POST /_matrix/client/v3/login` (§4.10).

use crate::ctx::{ok, HandlerCtx, HandlerResult};
use crate::handlers::{full_user_id, generate_device_id};
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_core::identifier;
use matrixon_users::{token, user};
use serde_json::json;

/// Advertise the login flows this server supports, so clients can
/// discover before posting (mirrors `RouteLogin.c`'s GET branch).
pub fn get(_ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    ok(json!({"flows": [{"type": "m.login.password"}]}))
}

fn identifier_localpart(body: &serde_json::Value) -> Option<String> {
    let raw = body
        .get("identifier")
        .and_then(|id| id.get("user"))
        .and_then(serde_json::Value::as_str)
        .or_else(|| body.get("user").and_then(serde_json::Value::as_str))?;
    Some(identifier::parse(raw).map(|id| id.local).unwrap_or_else(|_| raw.to_string()))
}

/// Mint an access+refresh token pair for `m.login.password` (§4.5,
/// §4.10). No other login type is supported: the core's Non-goals
/// exclude SSO and third-party identifier flows.
pub fn post(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let body = ctx.json_body()?;
    let login_type = body.get("type").and_then(serde_json::Value::as_str).unwrap_or("");
    if login_type != "m.login.password" {
        return Err(MatrixError::with_message(
            ErrorKind::Unrecognized,
            "only m.login.password is supported",
        ));
    }
    let localpart = identifier_localpart(&body)
        .ok_or_else(|| MatrixError::with_message(ErrorKind::MissingParam, "missing field 'identifier.user'"))?;
    let password = body
        .get("password")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| MatrixError::with_message(ErrorKind::MissingParam, "missing field 'password'"))?;

    let (mut locked_user, obj) = user::lock(&ctx.state.store, &localpart).map_err(|_| MatrixError::new(ErrorKind::Forbidden))?;
    if locked_user.deactivated || !user::check_password(&locked_user, password) {
        let _ = obj.discard();
        return Err(MatrixError::new(ErrorKind::Forbidden));
    }

    let device_id = body
        .get("device_id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(generate_device_id);
    let display_name = body
        .get("initial_device_display_name")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let (access_token, _access_record) = token::mint_access_token(&ctx.state.store, &localpart, &device_id, None, true)
        .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    let refresh_token = token::mint_refresh_token(&ctx.state.store, &access_token)
        .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;

    user::set_device(
        &mut locked_user,
        device_id.clone(),
        user::Device {
            access_token: access_token.clone(),
            refresh_token: Some(refresh_token.clone()),
            display_name,
            last_seen: token::now_ms(),
        },
    );
    user::unlock(obj, &locked_user).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;

    ok(json!({
        "user_id": full_user_id(&localpart, &ctx.state.server_name),
        "access_token": access_token,
        "refresh_token": refresh_token,
        "device_id": device_id,
    }))
}
