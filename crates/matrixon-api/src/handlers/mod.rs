// =============================================================================
// Matrixon Homeserver Core - Handler Module Root
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
//   Declares every route-handler module and the small helpers (full user id 
//   formatting, device id generation) they share.
//
// Performance Targets:
//   • N/A: module declarations only
//
// Architecture:
//   • Every handler has the shape fn(&HandlerCtx, &[String]) -> HandlerResult
// =============================================================================

//! Route handlers (§4.10): each composes the lower components into
//! one step of the Matrix Client-Server API surface. Every handler has
//! the shape `fn(&HandlerCtx, &[String]) -> HandlerResult`, where the
//! slice is the router's path captures in declared order.

pub mod account;
pub mod admin;
pub mod capabilities;
pub mod directory;
pub mod login;
pub mod logout;
pub mod refresh;
pub mod register;
pub mod static_assets;
pub mod user_filter;

use uuid::Uuid;

/// A fresh, opaque device id for logins/registrations that didn't
/// supply their own (§3's `Device` entity names no id format).
pub fn generate_device_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_uppercase()
}

/// `@localpart:server_name`, the full Matrix user id (§4.4).
pub fn full_user_id(localpart: &str, server_name: &str) -> String {
    format!("@{localpart}:{server_name}")
}
