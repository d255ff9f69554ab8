// =============================================================================
// Matrixon Homeserver Core - Core Module Root
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
//   Configuration, identifiers, canonical JSON and the cron scheduler: the layer 
//   directly above the object store, shared by both the identity subsystem and 
//   the API surface.
//
// Performance Targets:
//   • N/A: module declarations and re-exports only
//
// Architecture:
//   • Every submodule here is synchronous except cron's own scheduler task
// =============================================================================

//! Configuration, identifiers, canonical JSON and the cron scheduler:
//! the layer of the homeserver core that sits directly above the object
//! store and is shared by both the user subsystem and the API surface.

pub mod canonical_json;
pub mod config;
pub mod cron;
pub mod identifier;
pub mod privilege;

pub use config::Config;
pub use cron::Cron;
pub use identifier::{CommonId, IdentifierError, Sigil};
pub use privilege::Privileges;
