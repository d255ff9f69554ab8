// =============================================================================
// Matrixon Homeserver Core - Event Filters
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
//   Shape-only validation and storage of Filter objects and the always-empty 
//   user-directory search stub; the core never evaluates a filter against events.
//
// Performance Targets:
//   • O(existing filters) id allocation per create
//
// Architecture:
//   • Filters and directory search keep no index beyond the object store itself
// =============================================================================

//! Event filters (§3, §4.2, §4.10): shape-validation and storage
//! only. The core never evaluates a filter against events — that's
//! deferred to the room collaborator (§7's open question) — so
//! this module's job is limited to accepting any JSON object as a
//! filter body, assigning it an id, and returning it unmodified later.

use matrixon_common::{ErrorKind, MatrixError};
use matrixon_db::{ObjectStore, Path, StoreError};
use serde_json::Value;

fn filter_path(localpart: &str, filter_id: &str) -> Result<Path, MatrixError> {
    Path::new(["filters", localpart, filter_id]).map_err(|_| MatrixError::new(ErrorKind::InvalidParam))
}

fn filters_prefix(localpart: &str) -> Result<Path, MatrixError> {
    Path::new(["filters", localpart]).map_err(|_| MatrixError::new(ErrorKind::InvalidParam))
}

/// Validate that `body` is shaped like a filter (a JSON object; the
/// core does not otherwise interpret its fields) and store it under a
/// freshly allocated id.
pub fn create(store: &ObjectStore, localpart: &str, body: &Value) -> Result<String, MatrixError> {
    if !body.is_object() {
        return Err(MatrixError::with_message(ErrorKind::BadJson, "filter body must be a JSON object"));
    }
    let prefix = filters_prefix(localpart)?;
    let existing = store.list(&prefix).unwrap_or_default();
    let next_id = existing
        .iter()
        .filter_map(|name| name.parse::<u64>().ok())
        .max()
        .map(|n| n + 1)
        .unwrap_or(0);
    let filter_id = next_id.to_string();
    let path = filter_path(localpart, &filter_id)?;
    store
        .create(&path, body)
        .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    Ok(filter_id)
}

/// Fetch a previously stored filter, verbatim.
pub fn get(store: &ObjectStore, localpart: &str, filter_id: &str) -> Result<Value, MatrixError> {
    let path = filter_path(localpart, filter_id)?;
    let obj = store.lock(&path).map_err(|e| match e {
        StoreError::NotFound(_) => MatrixError::new(ErrorKind::NotFound),
        _ => MatrixError::new(ErrorKind::Unknown),
    })?;
    let value = obj.json().clone();
    obj.discard().map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    Ok(value)
}

/// The request body of `POST /_matrix/client/v3/user_directory/search`
/// (§3's User-Directory supplement): shape-only, the core never
/// actually searches a directory.
#[derive(Debug, Clone, Default)]
pub struct UserDirectoryRequest {
    pub search_term: String,
    pub limit: Option<u64>,
}

impl UserDirectoryRequest {
    pub fn parse(value: &Value) -> Result<Self, MatrixError> {
        let search_term = value
            .get("search_term")
            .and_then(Value::as_str)
            .ok_or_else(|| MatrixError::with_message(ErrorKind::BadJson, "missing field 'search_term'"))?
            .to_string();
        let limit = value.get("limit").and_then(Value::as_u64);
        Ok(UserDirectoryRequest { search_term, limit })
    }
}

/// Always empty: no directory index exists in this core (§3).
pub fn search_user_directory(_request: &UserDirectoryRequest) -> Value {
    serde_json::json!({
        "results": [],
        "limit_reached": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_rejects_a_non_object_body() {
        let (_dir, store) = store();
        let err = create(&store, "alice", &json!("not an object")).unwrap_err();
        assert_eq!(err.errcode, "M_BAD_JSON");
    }

    #[test]
    fn create_then_get_round_trips_the_body_verbatim() {
        let (_dir, store) = store();
        let body = json!({"room": {"timeline": {"limit": 10}}});
        let id = create(&store, "alice", &body).unwrap();
        let fetched = get(&store, "alice", &id).unwrap();
        assert_eq!(fetched, body);
    }

    #[test]
    fn successive_filters_get_distinct_increasing_ids() {
        let (_dir, store) = store();
        let id1 = create(&store, "alice", &json!({})).unwrap();
        let id2 = create(&store, "alice", &json!({})).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn get_unknown_filter_is_not_found() {
        let (_dir, store) = store();
        let err = get(&store, "alice", "999").unwrap_err();
        assert_eq!(err.errcode, "M_NOT_FOUND");
    }

    #[test]
    fn user_directory_search_always_returns_empty_results() {
        let request = UserDirectoryRequest::parse(&json!({"search_term": "al"})).unwrap();
        let response = search_user_directory(&request);
        assert_eq!(response["results"], json!([]));
        assert_eq!(response["limit_reached"], json!(false));
    }
}
