// =============================================================================
// Matrixon Homeserver Core - Static Asset Endpoint
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
//   The static asset route exists purely so it is reachable and disjoint from 
//   the rest of the router; no assets ship with this core.
//
// Performance Targets:
//   • Always a 404, no filesystem access
//
// Architecture:
//   • Present only to exercise router precedence against a wildcard
// =============================================================================

//! `GET /_matrix/static/*` (§4.10). No assets ship with this core;
//! the route exists so it's reachable and disjoint from the rest of the
//! router, per §8's router-precedence tests.

use crate::ctx::{HandlerCtx, HandlerResult};
use matrixon_common::{ErrorKind, MatrixError};

pub fn serve(_ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    Err(MatrixError::with_message(
        ErrorKind::NotFound,
        "no static assets are bundled",
    ))
}
