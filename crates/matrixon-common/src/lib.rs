// =============================================================================
// Matrixon Homeserver Core - Common Error Model
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
//   The lowest layer in the workspace: no dependency on any other Matrixon 
//   crate, so a single MatrixError can travel from a deeply nested store 
//   operation all the way out to an HTTP response.
//
// Performance Targets:
//   • Zero-dependency crate: only serde and thiserror
//
// Architecture:
//   • Consumed by the object store, the identity subsystem, and the API crate
// =============================================================================

//! Shared error model for Matrixon.
//!
//! This crate has no dependency on any other Matrixon crate: it is the
//! lowest layer, consumed by everything above it (the object store, the
//! user subsystem, and the HTTP API) so that a single `MatrixError` type
//! can travel from a deeply nested operation all the way out to an HTTP
//! response without being re-wrapped at every layer.

pub mod error;

pub use error::{ErrorKind, MatrixError};
