// =============================================================================
// Matrixon Homeserver Core - Object Store Module Root
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
//   The object store: a content-addressed, file-backed key-value store holding 
//   JSON documents, keyed by path tuples, with per-object flock-based locking.
//
// Performance Targets:
//   • Single writer, serialized readers: no separate read lock
//
// Architecture:
//   • Everything above this crate treats it as the only source of durable state
// =============================================================================

//! The object store (§3, §4.1): a content-addressed, file-backed
//! key-value store holding JSON documents, keyed by path tuples, with
//! per-object locking (single writer, multiple readers are serialized
//! through the same lock — there is no separate read lock).
//!
//! Everything above this crate — configuration, users, tokens, UIA
//! sessions — is just a JSON document living at some path tuple here.

pub mod error;
pub mod path;
pub mod schema;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use path::Path;
pub use schema::{FromJson, ToJson};
pub use store::{ObjectRef, ObjectStore};
