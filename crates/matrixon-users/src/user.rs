// =============================================================================
// Matrixon Homeserver Core - User Accounts & Devices
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
//   The User/Device entities and their lifecycle: create, lock/unlock, password 
//   set/check, deactivate/reactivate, device and profile management.
//
// Performance Targets:
//   • One object-store lock per mutation
//
// Architecture:
//   • Deactivation revokes tokens but keeps the account record for audit
// =============================================================================

//! The user account entity and its lifecycle operations (§3, §4.6).

use crate::password::{self, PasswordHash};
use crate::token::{self, now_ms};
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_core::Privileges;
use matrixon_db::schema::require_str;
use matrixon_db::{FromJson, ObjectRef, ObjectStore, Path, StoreError, StoreResult, ToJson};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

fn is_valid_localpart(localpart: &str) -> bool {
    !localpart.is_empty()
        && localpart
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '=' | '/' | '-'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub display_name: Option<String>,
    pub last_seen: u64,
}

impl ToJson for Device {
    fn to_json(&self) -> Value {
        json!({
            "accessToken": self.access_token,
            "refreshToken": self.refresh_token,
            "displayName": self.display_name,
            "lastSeen": self.last_seen,
        })
    }
}

impl FromJson for Device {
    fn from_json(value: &Value) -> StoreResult<Self> {
        Ok(Device {
            access_token: require_str(value, "accessToken")?.to_string(),
            refresh_token: value.get("refreshToken").and_then(Value::as_str).map(str::to_string),
            display_name: value.get("displayName").and_then(Value::as_str).map(str::to_string),
            last_seen: value.get("lastSeen").and_then(Value::as_u64).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub localpart: String,
    pub password: PasswordHash,
    pub devices: BTreeMap<String, Device>,
    pub profile: Map<String, Value>,
    pub privileges: Privileges,
    pub deactivated: bool,
    pub deactivation_reason: Option<String>,
    pub deactivated_by: Option<String>,
}

impl ToJson for User {
    fn to_json(&self) -> Value {
        let devices: Map<String, Value> = self
            .devices
            .iter()
            .map(|(id, device)| (id.clone(), device.to_json()))
            .collect();
        json!({
            "localpart": self.localpart,
            "passwordHash": self.password,
            "devices": devices,
            "profile": self.profile,
            "privileges": self.privileges,
            "deactivated": self.deactivated,
            "deactivationReason": self.deactivation_reason,
            "deactivatedBy": self.deactivated_by,
        })
    }
}

impl FromJson for User {
    fn from_json(value: &Value) -> StoreResult<Self> {
        let localpart = require_str(value, "localpart")?.to_string();
        let password: PasswordHash = value
            .get("passwordHash")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e: serde_json::Error| StoreError::Corrupt(e.to_string()))?
            .ok_or_else(|| StoreError::Corrupt("missing field 'passwordHash'".into()))?;

        let devices = match value.get("devices").and_then(Value::as_object) {
            Some(map) => map
                .iter()
                .map(|(id, v)| Device::from_json(v).map(|d| (id.clone(), d)))
                .collect::<StoreResult<BTreeMap<_, _>>>()?,
            None => BTreeMap::new(),
        };

        let profile = value
            .get("profile")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let privileges = match value.get("privileges").and_then(Value::as_array) {
            Some(names) => Privileges::decode(names.iter().filter_map(Value::as_str)),
            None => Privileges::NONE,
        };

        Ok(User {
            localpart,
            password,
            devices,
            profile,
            privileges,
            deactivated: value.get("deactivated").and_then(Value::as_bool).unwrap_or(false),
            deactivation_reason: value
                .get("deactivationReason")
                .and_then(Value::as_str)
                .map(str::to_string),
            deactivated_by: value.get("deactivatedBy").and_then(Value::as_str).map(str::to_string),
        })
    }
}

fn user_path(localpart: &str) -> StoreResult<Path> {
    Path::new(["users", localpart])
}

/// Create a new account with a freshly hashed password.
pub fn create(
    store: &ObjectStore,
    localpart: &str,
    password: &str,
    privileges: Privileges,
) -> Result<User, MatrixError> {
    if !is_valid_localpart(localpart) {
        return Err(MatrixError::new(ErrorKind::InvalidUsername));
    }
    let user = User {
        localpart: localpart.to_string(),
        password: password::hash(password),
        devices: BTreeMap::new(),
        profile: Map::new(),
        privileges,
        deactivated: false,
        deactivation_reason: None,
        deactivated_by: None,
    };
    let path = user_path(localpart).map_err(|_| MatrixError::new(ErrorKind::InvalidUsername))?;
    match store.create(&path, &user.to_json()) {
        Ok(()) => Ok(user),
        Err(StoreError::Exists(_)) => Err(MatrixError::new(ErrorKind::UserInUse)),
        Err(_) => Err(MatrixError::new(ErrorKind::Unknown)),
    }
}

pub fn exists(store: &ObjectStore, localpart: &str) -> bool {
    user_path(localpart).map(|p| store.exists(&p)).unwrap_or(false)
}

pub fn lock(store: &ObjectStore, localpart: &str) -> Result<(User, ObjectRef), MatrixError> {
    let path = user_path(localpart).map_err(|_| MatrixError::new(ErrorKind::InvalidUsername))?;
    let obj = store.lock(&path).map_err(|e| match e {
        StoreError::NotFound(_) => MatrixError::new(ErrorKind::NotFound),
        _ => MatrixError::new(ErrorKind::Unknown),
    })?;
    let user = User::from_json(obj.json()).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    Ok((user, obj))
}

pub fn unlock(mut obj: ObjectRef, user: &User) -> StoreResult<()> {
    obj.set_json(user.to_json());
    obj.commit()
}

/// Hash and store a new password for an already-locked user.
pub fn set_password(user: &mut User, new_password: &str) {
    user.password = password::hash(new_password);
}

pub fn check_password(user: &User, candidate: &str) -> bool {
    password::verify(&user.password, candidate)
}

/// Deactivated users retain their record but can never authenticate
/// again until reactivated (§4.6's invariant); reactivation does
/// not resurrect any tokens that existed before deactivation.
pub fn deactivate(user: &mut User, by_localpart: &str, reason: Option<String>) {
    user.deactivated = true;
    user.deactivation_reason = reason;
    user.deactivated_by = Some(by_localpart.to_string());
}

pub fn reactivate(user: &mut User) {
    user.deactivated = false;
    user.deactivation_reason = None;
    user.deactivated_by = None;
}

/// Revoke all of a user's access and paired refresh tokens, optionally
/// sparing one access token string (e.g. the one making the request).
pub fn delete_tokens(
    store: &ObjectStore,
    user: &User,
    except_token_string: Option<&str>,
) -> StoreResult<()> {
    for device in user.devices.values() {
        if Some(device.access_token.as_str()) == except_token_string {
            continue;
        }
        token::delete_access_token(store, &device.access_token)?;
        if let Some(refresh_token) = &device.refresh_token {
            token::delete_refresh_token(store, refresh_token)?;
        }
    }
    Ok(())
}

pub fn get_devices(user: &User) -> &BTreeMap<String, Device> {
    &user.devices
}

pub fn set_device(user: &mut User, device_id: impl Into<String>, device: Device) {
    user.devices.insert(device_id.into(), device);
}

pub fn touch_device(user: &mut User, device_id: &str) {
    if let Some(device) = user.devices.get_mut(device_id) {
        device.last_seen = now_ms();
    }
}

pub fn get_profile(user: &User) -> &Map<String, Value> {
    &user.profile
}

pub fn set_profile_field(user: &mut User, key: impl Into<String>, value: Value) {
    user.profile.insert(key.into(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_then_lock_round_trips() {
        let (_dir, store) = store();
        create(&store, "alice", "hunter2", Privileges::NONE).unwrap();
        let (user, obj) = lock(&store, "alice").unwrap();
        assert_eq!(user.localpart, "alice");
        assert!(check_password(&user, "hunter2"));
        obj.discard().unwrap();
    }

    #[test]
    fn create_rejects_invalid_localparts() {
        let (_dir, store) = store();
        let err = create(&store, "Alice Smith", "pw", Privileges::NONE).unwrap_err();
        assert_eq!(err.errcode, "M_INVALID_USERNAME");
    }

    #[test]
    fn create_twice_is_user_in_use() {
        let (_dir, store) = store();
        create(&store, "alice", "pw", Privileges::NONE).unwrap();
        let err = create(&store, "alice", "pw2", Privileges::NONE).unwrap_err();
        assert_eq!(err.errcode, "M_USER_IN_USE");
    }

    #[test]
    fn deactivated_users_do_not_resurrect_authentication_on_reactivate_without_new_tokens() {
        let (_dir, store) = store();
        create(&store, "alice", "pw", Privileges::NONE).unwrap();
        let (mut user, obj) = lock(&store, "alice").unwrap();
        deactivate(&mut user, "admin", Some("policy violation".to_string()));
        assert!(user.deactivated);
        reactivate(&mut user);
        assert!(!user.deactivated);
        assert!(user.devices.is_empty());
        unlock(obj, &user).unwrap();
    }

    #[test]
    fn delete_tokens_spares_the_excepted_token() {
        let (_dir, store) = store();
        create(&store, "alice", "pw", Privileges::NONE).unwrap();
        let (mut user, obj) = lock(&store, "alice").unwrap();

        let (t1, _) = token::mint_access_token(&store, "alice", "D1", None, false).unwrap();
        let (t2, _) = token::mint_access_token(&store, "alice", "D2", None, false).unwrap();
        set_device(&mut user, "D1", Device { access_token: t1.clone(), refresh_token: None, display_name: None, last_seen: 0 });
        set_device(&mut user, "D2", Device { access_token: t2.clone(), refresh_token: None, display_name: None, last_seen: 0 });
        unlock(obj, &user).unwrap();

        let (user, obj) = lock(&store, "alice").unwrap();
        delete_tokens(&store, &user, Some(&t1)).unwrap();
        obj.discard().unwrap();

        assert!(token::peek_access_token(&store, &t1).is_ok());
        assert!(token::peek_access_token(&store, &t2).is_err());
    }

    #[test]
    fn privileges_round_trip_through_json() {
        let (_dir, store) = store();
        create(&store, "alice", "pw", Privileges::DEACTIVATE | Privileges::ALIAS).unwrap();
        let (user, obj) = lock(&store, "alice").unwrap();
        assert!(user.privileges.has(Privileges::ALIAS));
        assert!(!user.privileges.has(Privileges::PROC_CONTROL));
        obj.discard().unwrap();
    }
}
