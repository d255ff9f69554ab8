// =============================================================================
// Matrixon Homeserver Core - File-Backed Object Store
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
//   ObjectStore and ObjectRef: 
//   open/exists/create/lock/lock_or_create/delete/list against a directory tree, 
//   with flock(2) (via fs2) guarding every access to a path.
//
// Performance Targets:
//   • One flock syscall per lock/unlock, no in-process lock table
//
// Architecture:
//   • A locked ObjectRef must be explicitly committed or discarded
// =============================================================================

//! A content-addressed, file-backed object store (§4.1).
//!
//! Every document lives at a [`Path`] and is locked for the duration of
//! any access — there is no separate read lock, so a reader and a writer
//! of the same object are always serialized against each other. Locking
//! is implemented with `flock(2)` via `fs2`, which blocks duplicate file
//! descriptors on the same inode whether they come from this process or
//! another one, so the same code gives single-process and multi-process
//! callers the same guarantee.

use crate::error::{StoreError, StoreResult};
use crate::path::Path;
use fs2::FileExt;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

/// A locked handle on one document. Dropping it without calling
/// [`ObjectRef::commit`] or [`ObjectRef::discard`] releases the lock
/// without writing anything back — callers that mutate `value` and then
/// drop the ref silently lose their change, so prefer an explicit call.
pub struct ObjectRef {
    path: Path,
    file: File,
    value: Value,
}

impl ObjectRef {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn json(&self) -> &Value {
        &self.value
    }

    pub fn json_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn set_json(&mut self, value: Value) {
        self.value = value;
    }

    /// Write the current value back to disk and release the lock.
    pub fn commit(mut self) -> StoreResult<()> {
        let data =
            serde_json::to_vec_pretty(&self.value).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&data)?;
        self.file.sync_all()?;
        FileExt::unlock(&self.file)?;
        Ok(())
    }

    /// Release the lock without writing anything back, e.g. after a
    /// read-only access.
    pub fn discard(self) -> StoreResult<()> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}

/// The object store: a directory tree rooted at `root`, where a
/// [`Path`]'s components become nested directories and the final
/// component becomes a `.json` file.
pub struct ObjectStore {
    root: std::path::PathBuf,
}

impl ObjectStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub fn open(root: impl Into<std::path::PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ObjectStore { root })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.to_file(&self.root).is_file()
    }

    /// Create a new document with an initial value. Errors with
    /// [`StoreError::Exists`] if one is already there.
    pub fn create(&self, path: &Path, value: &Value) -> StoreResult<()> {
        let file_path = path.to_file(&self.root);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&file_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StoreError::Exists(path.to_string())
                } else {
                    StoreError::Io(e)
                }
            })?;
        file.lock_exclusive()?;
        let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        file.write_all(&data)?;
        file.sync_all()?;
        FileExt::unlock(&file)?;
        Ok(())
    }

    /// Lock an existing document for reading or writing, blocking until
    /// any other holder releases it.
    pub fn lock(&self, path: &Path) -> StoreResult<ObjectRef> {
        let file_path = path.to_file(&self.root);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&file_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StoreError::NotFound(path.to_string())
                } else {
                    StoreError::Io(e)
                }
            })?;
        file.lock_exclusive()?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let value: Value =
            serde_json::from_str(&buf).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(ObjectRef {
            path: path.clone(),
            file,
            value,
        })
    }

    /// Lock an existing document, or create it with `default` if absent,
    /// then lock it. Used for lazily-initialized singletons like the
    /// config document.
    pub fn lock_or_create(&self, path: &Path, default: impl FnOnce() -> Value) -> StoreResult<ObjectRef> {
        if !self.exists(path) {
            match self.create(path, &default()) {
                Ok(()) | Err(StoreError::Exists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.lock(path)
    }

    /// Remove a document entirely. Blocks until any other holder of the
    /// lock has released it.
    pub fn delete(&self, path: &Path) -> StoreResult<()> {
        let file_path = path.to_file(&self.root);
        let file = OpenOptions::new().write(true).open(&file_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        file.lock_exclusive()?;
        fs::remove_file(&file_path)?;
        FileExt::unlock(&file)?;
        Ok(())
    }

    /// List the immediate children of a path: directory entries for
    /// nested namespaces, and the leaf names (without `.json`) of
    /// documents directly inside it.
    pub fn list(&self, prefix: &Path) -> StoreResult<Vec<String>> {
        let dir = prefix.to_dir(&self.root);
        let mut names = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(StoreError::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                names.push(stem.to_string());
            } else if entry.path().is_dir() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
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
    fn create_then_lock_round_trips_the_value() {
        let (_dir, store) = store();
        let path = Path::new(["users", "alice"]).unwrap();
        store.create(&path, &json!({"displayname": "Alice"})).unwrap();

        let obj = store.lock(&path).unwrap();
        assert_eq!(obj.json()["displayname"], "Alice");
        obj.discard().unwrap();
    }

    #[test]
    fn create_twice_fails_with_exists() {
        let (_dir, store) = store();
        let path = Path::new(["users", "alice"]).unwrap();
        store.create(&path, &json!({})).unwrap();
        let err = store.create(&path, &json!({})).unwrap_err();
        assert!(matches!(err, StoreError::Exists(_)));
    }

    #[test]
    fn lock_missing_object_fails_with_not_found() {
        let (_dir, store) = store();
        let path = Path::new(["users", "nobody"]).unwrap();
        assert!(matches!(store.lock(&path), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn commit_persists_a_mutation() {
        let (_dir, store) = store();
        let path = Path::new(["users", "alice"]).unwrap();
        store.create(&path, &json!({"displayname": "Alice"})).unwrap();

        let mut obj = store.lock(&path).unwrap();
        obj.set_json(json!({"displayname": "Alicia"}));
        obj.commit().unwrap();

        let obj = store.lock(&path).unwrap();
        assert_eq!(obj.json()["displayname"], "Alicia");
        obj.discard().unwrap();
    }

    #[test]
    fn delete_removes_the_document() {
        let (_dir, store) = store();
        let path = Path::new(["users", "alice"]).unwrap();
        store.create(&path, &json!({})).unwrap();
        assert!(store.exists(&path));
        store.delete(&path).unwrap();
        assert!(!store.exists(&path));
        assert!(matches!(store.lock(&path), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_returns_child_leaf_names() {
        let (_dir, store) = store();
        store
            .create(&Path::new(["users", "alice"]).unwrap(), &json!({}))
            .unwrap();
        store
            .create(&Path::new(["users", "bob"]).unwrap(), &json!({}))
            .unwrap();

        let names = store.list(&Path::new(["users"]).unwrap()).unwrap();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn list_of_empty_prefix_is_empty_not_an_error() {
        let (_dir, store) = store();
        let names = store.list(&Path::new(["nothing", "here"]).unwrap()).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn lock_or_create_initializes_a_default_once() {
        let (_dir, store) = store();
        let path = Path::new(["config"]).unwrap();
        let obj = store
            .lock_or_create(&path, || json!({"serverName": "example.org"}))
            .unwrap();
        assert_eq!(obj.json()["serverName"], "example.org");
        obj.discard().unwrap();

        let obj = store
            .lock_or_create(&path, || json!({"serverName": "should-not-be-used"}))
            .unwrap();
        assert_eq!(obj.json()["serverName"], "example.org");
        obj.discard().unwrap();
    }
}
