// =============================================================================
// Matrixon Homeserver Core - Well-Known & Directory Endpoints
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
//   The .well-known/matrix/{client,server} discovery documents and the 
//   always-empty user-directory search.
//
// Performance Targets:
//   • Well-known documents are computed, not stored
//
// Architecture:
//   • No directory index: search always reports zero results
// =============================================================================

//! `GET /.well-known/matrix/{client|server}` and
//! `POST /_matrix/client/v3/user_directory/search` (§4.10, §6;
//! the User-Directory supplement).

use crate::ctx::{ok, HandlerCtx, HandlerResult};
use crate::filter::{search_user_directory, UserDirectoryRequest};
use matrixon_common::MatrixError;
use serde_json::json;

pub fn well_known_client(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let config = ctx
        .state
        .current_config()
        .map_err(|_| MatrixError::new(matrixon_common::ErrorKind::Unknown))?;
    let mut body = json!({"m.homeserver": {"base_url": config.base_url}});
    if let Some(identity_server) = config.identity_server {
        body["m.identity_server"] = json!({"base_url": identity_server});
    }
    ok(body)
}

pub fn well_known_server(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let config = ctx
        .state
        .current_config()
        .map_err(|_| MatrixError::new(matrixon_common::ErrorKind::Unknown))?;
    ok(json!({"m.server": format!("{}:443", config.server_name)}))
}

/// Shape-validated, always-empty directory search (the same "validate
/// shape, don't implement the behavior" treatment already applied to
/// Filter; no directory index exists in this core).
pub fn search(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let body = ctx.json_body()?;
    let request = UserDirectoryRequest::parse(&body)?;
    ok(search_user_directory(&request))
}
