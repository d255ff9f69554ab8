// =============================================================================
// Matrixon Homeserver Core - Bearer Token Authentication
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
//   Resolves an Authorization header into an authenticated user/device pair and 
//   enforces the administrative privilege bitset a handler requires.
//
// Performance Targets:
//   • Single object-store lookup per authenticated request
//
// Architecture:
//   • Token lookup delegated to matrixon-users::token
//   • Privilege checks delegated to matrixon-core::Privileges
// =============================================================================

//! Bearer-token authentication for handlers that require it (§4.5's
//! `Authenticate`, §4.10 step 2).

use crate::ctx::HandlerCtx;
use crate::state::AppState;
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_core::Privileges;
use matrixon_users::token;
use matrixon_users::user::{self, User};

/// An authenticated caller: the locked `User` plus the device and
/// access-token string the request presented, so handlers can exempt
/// "this" token from a bulk revocation.
pub struct Authenticated {
    pub user: User,
    pub device: String,
    pub token: String,
}

/// Resolve the bearer token on `ctx` to a live, non-deactivated user
/// (§4.5 `Authenticate`). Locks the user document; callers are
/// responsible for unlocking it (via `user::unlock`) once done, or
/// discarding it if read-only.
pub fn authenticate(ctx: &HandlerCtx, state: &AppState) -> Result<Authenticated, MatrixError> {
    let token = ctx.bearer_token().ok_or_else(|| MatrixError::new(ErrorKind::MissingToken))?;
    let record = token::peek_access_token(&state.store, &token)?;
    let (locked_user, obj) = user::lock(&state.store, &record.user)
        .map_err(|_| MatrixError::new(ErrorKind::UnknownToken))?;
    if locked_user.deactivated {
        let _ = obj.discard();
        return Err(MatrixError::new(ErrorKind::UserDeactivated));
    }
    obj.discard().map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    Ok(Authenticated {
        user: locked_user,
        device: record.device,
        token,
    })
}

/// Gate an admin endpoint on a privilege flag (§4.10's
/// privilege-gated handlers). `ALL` implies every individual flag, per
/// [`Privileges::has`].
pub fn require_privilege(auth: &Authenticated, flag: Privileges) -> Result<(), MatrixError> {
    if auth.user.privileges.has(flag) {
        Ok(())
    } else {
        Err(MatrixError::new(ErrorKind::Forbidden))
    }
}
