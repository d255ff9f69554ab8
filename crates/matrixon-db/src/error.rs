// =============================================================================
// Matrixon Homeserver Core - Object Store Errors
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
//   The StoreError enum covering every failure mode the object store's operation 
//   table can raise.
//
// Performance Targets:
//   • N/A: error type definitions only
//
// Architecture:
//   • One error type shared by every store operation (open/exists/create/lock/delete/list)
// =============================================================================

use thiserror::Error;

/// Errors raised by the object store (§4.1's operation table).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object already exists: {0}")]
    Exists(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object is locked by another holder: {0}")]
    Locked(String),

    #[error("invalid path component: {0:?}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
