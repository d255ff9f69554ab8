// =============================================================================
// Matrixon Homeserver Core - Logout Endpoints
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
//   Revokes the caller's current access/refresh token pair, or every token 
//   across every device.
//
// Performance Targets:
//   • O(devices) token revocation for logout/all
//
// Architecture:
//   • Token deletion delegated to matrixon-users::token
// =============================================================================

//! `POST /_matrix/client/v3/logout` and `POST /_matrix/client/v3/logout/all`
//! (§4.10).

use crate::auth;
use crate::ctx::{ok, HandlerCtx, HandlerResult};
use matrixon_common::MatrixError;
use matrixon_users::{token, user};
use serde_json::json;

/// Revoke only the token presented on this request, plus its paired
/// refresh token if one exists.
pub fn logout(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let refresh_token = authenticated
        .user
        .devices
        .get(&authenticated.device)
        .and_then(|d| d.refresh_token.clone());

    token::delete_access_token(&ctx.state.store, &authenticated.token)
        .map_err(|_| MatrixError::new(matrixon_common::ErrorKind::Unknown))?;
    if let Some(refresh_token) = refresh_token {
        token::delete_refresh_token(&ctx.state.store, &refresh_token)
            .map_err(|_| MatrixError::new(matrixon_common::ErrorKind::Unknown))?;
    }

    ok(json!({}))
}

/// Revoke every token belonging to the authenticated user.
pub fn logout_all(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let authenticated = auth::authenticate(ctx, &ctx.state)?;
    let (locked_user, obj) = user::lock(&ctx.state.store, &authenticated.user.localpart)?;
    user::delete_tokens(&ctx.state.store, &locked_user, None)
        .map_err(|_| MatrixError::new(matrixon_common::ErrorKind::Unknown))?;
    obj.discard().map_err(|_| MatrixError::new(matrixon_common::ErrorKind::Unknown))?;
    ok(json!({}))
}
