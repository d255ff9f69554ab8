// =============================================================================
// Matrixon Homeserver Core - Account Endpoints
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
//   GET whoami, POST password (UIA-gated, revokes other devices' tokens on 
//   change), and POST deactivate (UIA-gated, revokes every token for the 
//   account).
//
// Performance Targets:
//   • Password change invalidates only other devices' tokens, not the caller's
//
// Architecture:
//   • Password/deactivate both route through the shared UIA engine
// =============================================================================

//! `GET /_matrix/client/v3/account/whoami`,
//! `POST /_matrix/client/v3/account/password`,
//! `POST /_matrix/client/v3/account/deactivate` (§4.10).

use crate::auth;
use crate::ctx::{ok, HandlerCtx, HandlerResult};
use crate::handlers::full_user_id;
use crate::uia::{self, Flow, StageInput, STAGE_PASSWORD};
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_users::user;
use serde_json::json;

pub fn whoami(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    ok(json!({
        "user_id": full_user_id(&authenticated.user.localpart, &ctx.state.server_name),
        "device_id": authenticated.device,
    }))
}

/// UIA-gated password change (§4.10, scenario 3): on success,
/// `logout_devices` (default true) revokes every other token belonging
/// to the user so a stolen password can't keep old sessions alive.
pub fn password(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let body = ctx.json_body()?;

    let flows = vec![Flow(vec![STAGE_PASSWORD])];
    let input = StageInput::from_auth_value(body.get("auth"));
    let outcome = uia::complete(&ctx.state.store, &flows, &input)?;
    if let uia::Outcome::Pending(r) = outcome {
        return Ok((r.status, r.body));
    }

    let new_password = body
        .get("new_password")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| MatrixError::with_message(ErrorKind::MissingParam, "missing field 'new_password'"))?;
    let logout_devices = body
        .get("logout_devices")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true);

    let (mut locked_user, obj) = user::lock(&ctx.state.store, &authenticated.user.localpart)?;
    user::set_password(&mut locked_user, new_password);
    if logout_devices {
        user::delete_tokens(&ctx.state.store, &locked_user, Some(&authenticated.token))
            .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    }
    user::unlock(obj, &locked_user).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;

    ok(json!({}))
}

/// UIA-gated self-deactivation: wipes every token and marks the
/// account deactivated (§4.6, §4.10).
pub fn deactivate(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let body = ctx.json_body()?;

    let flows = vec![Flow(vec![STAGE_PASSWORD])];
    let input = StageInput::from_auth_value(body.get("auth"));
    let outcome = uia::complete(&ctx.state.store, &flows, &input)?;
    if let uia::Outcome::Pending(r) = outcome {
        return Ok((r.status, r.body));
    }

    let (mut locked_user, obj) = user::lock(&ctx.state.store, &authenticated.user.localpart)?;
    user::delete_tokens(&ctx.state.store, &locked_user, None).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    user::deactivate(&mut locked_user, &authenticated.user.localpart, None);
    user::unlock(obj, &locked_user).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;

    ok(json!({"id_server_unbind_result": "no-support"}))
}
