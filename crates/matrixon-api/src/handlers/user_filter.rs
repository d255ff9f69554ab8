// =============================================================================
// Matrixon Homeserver Core - User Filter Endpoints
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
//   Create and fetch Filter objects for a user, delegating all shape validation 
//   and storage to matrixon-api::filter.
//
// Performance Targets:
//   • O(existing filters) id allocation on create
//
// Architecture:
//   • Filters are opaque JSON: never evaluated against events here
// =============================================================================

//! `GET/POST /_matrix/client/v3/user/{userId}/filter[/{filterId}]`
//! (§3, §4.2, §4.10).

use crate::auth;
use crate::ctx::{ok, HandlerCtx, HandlerResult};
use crate::filter;
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_core::identifier;
use serde_json::json;

fn captured_localpart(captures: &[String]) -> Result<String, MatrixError> {
    let raw = captures
        .first()
        .ok_or_else(|| MatrixError::new(ErrorKind::MissingParam))?;
    Ok(identifier::parse(raw).map(|id| id.local).unwrap_or_else(|_| raw.clone()))
}

/// Store a caller-supplied filter under the authenticated user's own
/// localpart; `userId` in the path must name the authenticated user
/// (the core has no notion of delegated filter management).
pub fn create(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let localpart = captured_localpart(captures)?;
    if localpart != authenticated.user.localpart {
        return Err(MatrixError::new(ErrorKind::Forbidden));
    }
    let body = ctx.json_body()?;
    let filter_id = filter::create(&ctx.state.store, &localpart, &body)?;
    ok(json!({"filter_id": filter_id}))
}

pub fn get(ctx: &HandlerCtx, captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let localpart = captured_localpart(captures)?;
    if localpart != authenticated.user.localpart {
        return Err(MatrixError::new(ErrorKind::Forbidden));
    }
    let filter_id = captures
        .get(1)
        .ok_or_else(|| MatrixError::new(ErrorKind::MissingParam))?;
    let body = filter::get(&ctx.state.store, &localpart, filter_id)?;
    ok(body)
}
