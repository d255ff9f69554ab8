// =============================================================================
// Matrixon Homeserver Core - Administrative Endpoints
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
//   Privilege-gated account deactivation, privilege get/set/add/remove, and 
//   process control (stats/restart/shutdown).
//
// Performance Targets:
//   • Single object-store lock per privilege mutation
//
// Architecture:
//   • PROC_CONTROL and GRANT_PRIVILEGES gate distinct operations
// =============================================================================

//! Privilege-gated administrative endpoints (§4.10):
//! `DELETE|PUT /_matrix/client/v3/admin/deactivate/{localpart}`,
//! `GET/POST/PUT/DELETE /_matrix/client/v3/admin/privileges[/{localpart}]`,
//! `POST /_matrix/client/v3/admin/proc/{restart|shutdown|stats}`.

use crate::auth;
use crate::ctx::{ok, HandlerCtx, HandlerResult};
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_core::Privileges;
use matrixon_users::user;
use serde_json::json;

/// `DEACTIVATE`-gated forced deactivation of another account.
pub fn deactivate_user(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    auth::require_privilege(&authenticated, Privileges::DEACTIVATE)?;

    let target_localpart = captures
        .first()
        .ok_or_else(|| MatrixError::new(ErrorKind::MissingParam))?;
    let (mut target, obj) = user::lock(&ctx.state.store, target_localpart)?;
    user::delete_tokens(&ctx.state.store, &target, None).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    user::deactivate(&mut target, &authenticated.user.localpart, None);
    user::unlock(obj, &target).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;

    ok(json!({}))
}

/// Targeting `self` needs no extra privilege; targeting another
/// localpart requires `GRANT_PRIVILEGES` (§4.10).
fn resolve_target<'a>(
    authenticated: &'a auth::Authenticated,
    captures: &'a [String],
) -> Result<&'a str, MatrixError> {
    match captures.first() {
        None => Ok(authenticated.user.localpart.as_str()),
        Some(localpart) if localpart == &authenticated.user.localpart => Ok(localpart.as_str()),
        Some(localpart) => {
            auth::require_privilege(authenticated, Privileges::GRANT_PRIVILEGES)?;
            Ok(localpart.as_str())
        }
    }
}

pub fn get_privileges(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let target = resolve_target(&authenticated, captures)?;
    let (target_user, obj) = user::lock(&ctx.state.store, target)?;
    let _ = obj.discard();
    ok(json!({"privileges": target_user.privileges.encode()}))
}

/// Parse the `{"privileges": [...]}` request body shared by the set,
/// add, and remove variants.
fn requested_privileges(ctx: &HandlerCtx) -> Result<Privileges, MatrixError> {
    let body = ctx.json_body()?;
    let names = body
        .get("privileges")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| MatrixError::with_message(ErrorKind::MissingParam, "missing field 'privileges'"))?;
    Ok(Privileges::decode(names.iter().filter_map(serde_json::Value::as_str)))
}

/// `POST`: replace the target's privilege set wholesale.
pub fn set_privileges(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let target = resolve_target(&authenticated, captures)?.to_string();
    let requested = requested_privileges(ctx)?;

    let (mut target_user, obj) = user::lock(&ctx.state.store, &target)?;
    target_user.privileges = requested;
    user::unlock(obj, &target_user).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    ok(json!({"privileges": target_user.privileges.encode()}))
}

/// `PUT`: add the requested flags to the target's existing set.
pub fn add_privileges(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let target = resolve_target(&authenticated, captures)?.to_string();
    let requested = requested_privileges(ctx)?;

    let (mut target_user, obj) = user::lock(&ctx.state.store, &target)?;
    target_user.privileges = target_user.privileges | requested;
    user::unlock(obj, &target_user).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    ok(json!({"privileges": target_user.privileges.encode()}))
}

/// `DELETE`: remove the requested flags from the target's existing set.
pub fn remove_privileges(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let target = resolve_target(&authenticated, captures)?.to_string();
    let requested = requested_privileges(ctx)?;

    let (mut target_user, obj) = user::lock(&ctx.state.store, &target)?;
    target_user.privileges = target_user.privileges.without(requested);
    user::unlock(obj, &target_user).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    ok(json!({"privileges": target_user.privileges.encode()}))
}

/// `PROC_CONTROL`-gated process control (§4.10, scenario 5).
pub fn proc(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    auth::require_privilege(&authenticated, Privileges::PROC_CONTROL)?;

    let action = captures.first().map(String::as_str).unwrap_or("");
    match action {
        "stats" => ok(json!({
            "uptime_ms": ctx.state.started_at.elapsed().as_millis() as u64,
            "cron_jobs": ctx.state.cron.job_names(),
        })),
        "restart" => {
            ctx.state.request_restart();
            ok(json!({}))
        }
        "shutdown" => {
            ctx.state.request_shutdown();
            ok(json!({}))
        }
        _ => Err(MatrixError::new(ErrorKind::Unrecognized)),
    }
}
