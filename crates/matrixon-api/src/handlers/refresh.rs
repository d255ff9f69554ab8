// =============================================================================
// Matrixon Homeserver Core - Token Refresh Endpoint
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
//   Rotates a refresh token into a fresh access+refresh pair, atomically, per 
//   the refresh-rotation protocol.
//
// Performance Targets:
//   • Bounded retries on the rare CSPRNG collision path
//
// Architecture:
//   • Rollback on any step's failure leaves the old pair usable
// =============================================================================

//! `POST /_matrix/client/v3/refresh` (§4.5, §4.10, scenario 2).

use crate::ctx::{ok, HandlerCtx, HandlerResult};
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_users::token;
use serde_json::json;

pub fn refresh(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let body = ctx.json_body()?;
    let refresh_token = body
        .get("refresh_token")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| MatrixError::with_message(ErrorKind::MissingParam, "missing field 'refresh_token'"))?;

    let rotated = token::refresh(&ctx.state.store, refresh_token)?;

    let mut response = json!({
        "access_token": rotated.access_token,
        "refresh_token": refresh_token,
    });
    if let Some(lifetime) = rotated.record.lifetime {
        response["expires_in_ms"] = json!(lifetime);
    }
    ok(response)
}
