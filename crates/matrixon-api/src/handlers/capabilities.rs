// =============================================================================
// Matrixon Homeserver Core - Capabilities Endpoints
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
//   Static, configuration-independent advertisement of what this server 
//   supports: GET capabilities and GET versions.
//
// Performance Targets:
//   • No object-store access: pure static response
//
// Architecture:
//   • Hand-written capability document, no per-feature registry
// =============================================================================

//! `GET /_matrix/client/v3/capabilities` and `GET /_matrix/client/versions`
//! (§4.10): static, configuration-independent advertisement of what
//! this server supports.

use crate::ctx::{ok, HandlerCtx, HandlerResult};
use serde_json::json;

pub fn capabilities(_ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    ok(json!({
        "capabilities": {
            "m.change_password": {"enabled": true},
            "m.set_displayname": {"enabled": true},
            "m.set_avatar_url": {"enabled": true},
            "m.3pid_changes": {"enabled": false},
        }
    }))
}

/// Spec versions this core implements, plus the unstable feature flags
/// it has no stub for and therefore reports as absent.
pub fn versions(_ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    ok(json!({
        "versions": [
            "v1.1", "v1.2", "v1.3", "v1.4", "v1.5", "v1.6", "v1.7", "v1.8", "v1.9", "v1.10", "v1.11"
        ],
        "unstable_features": {},
    }))
}
