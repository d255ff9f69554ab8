// =============================================================================
// Matrixon Homeserver Core - Request Context
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
//   The per-request context handed to every handler: request 
//   method/headers/query/body plus a handle on the shared AppState, and the 
//   small HandlerResult/ok() helpers handlers return through.
//
// Performance Targets:
//   • No per-request heap allocation beyond owned header/query/body copies
//
// Architecture:
//   • Deliberately free of axum types so handlers stay unit-testable
// =============================================================================

//! The per-request context handlers operate on (§4.10: `(pathCaptures,
//! ctx: {request, response, db, config})`).

use crate::state::AppState;
use http::{HeaderMap, Method, StatusCode};
use matrixon_common::{ErrorKind, MatrixError};
use serde_json::Value;
use std::sync::Arc;

/// Everything a handler needs besides its path captures.
pub struct HandlerCtx {
    pub state: Arc<AppState>,
    pub method: Method,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body_bytes: Vec<u8>,
    pub peer: String,
}

impl HandlerCtx {
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Extract the bearer token per §6: `Authorization: Bearer …`
    /// takes precedence over `?access_token=` when both are present.
    pub fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get(http::header::AUTHORIZATION) {
            if let Ok(s) = value.to_str() {
                if let Some(token) = s.strip_prefix("Bearer ") {
                    return Some(token.to_string());
                }
            }
        }
        self.query_param("access_token").map(str::to_string)
    }

    /// Decode the request body as JSON (§4.10 step 3): an empty
    /// body or one that fails to parse as JSON at all is `M_NOT_JSON`;
    /// this layer only does the generic parse, schema failures are each
    /// handler's own `M_BAD_JSON`.
    pub fn json_body(&self) -> Result<Value, MatrixError> {
        if self.body_bytes.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_slice(&self.body_bytes)
            .map_err(|_| MatrixError::new(ErrorKind::NotJson))
    }
}

/// The outcome of a handler: either a status+body to serialize, or a
/// `MatrixError` to render through the uniform envelope (§4.8).
pub type HandlerResult = Result<(StatusCode, Value), MatrixError>;

pub fn ok(value: Value) -> HandlerResult {
    Ok((StatusCode::OK, value))
}

pub fn ok_with_status(status: StatusCode, value: Value) -> HandlerResult {
    Ok((status, value))
}
