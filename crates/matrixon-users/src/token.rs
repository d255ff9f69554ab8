// =============================================================================
// Matrixon Homeserver Core - Access, Refresh & Registration Tokens
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
//   Access/refresh/registration token lifecycle, including the atomic 
//   refresh-rotation protocol (lock, mint, rewrite, delete old, roll back on 
//   failure) and registration-token invariants.
//
// Performance Targets:
//   • Bounded CSPRNG-collision retry loop on mint
//
// Architecture:
//   • Registration-token names escape through Path's narrower charset at the store boundary, not the other way around
// =============================================================================

//! Access, refresh and registration tokens (§3, §4.5).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_core::Privileges;
use matrixon_db::schema::{require_i64, require_str, require_u64};
use matrixon_db::{FromJson, ObjectStore, Path, StoreError, StoreResult, ToJson};
use rand::RngCore;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// 24 bytes is 192 bits of entropy, comfortably above the 128-bit
/// floor, base64url-encoded into a URL-safe bearer token.
const TOKEN_BYTES: usize = 24;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}

fn generate_token_string() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRecord {
    pub user: String,
    pub device: String,
    pub lifetime: Option<u64>,
    pub issued_at: u64,
    pub refreshable: bool,
}

impl AccessTokenRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        match self.lifetime {
            Some(lifetime) => now >= self.issued_at.saturating_add(lifetime),
            None => false,
        }
    }
}

impl ToJson for AccessTokenRecord {
    fn to_json(&self) -> Value {
        json!({
            "user": self.user,
            "device": self.device,
            "lifetime": self.lifetime,
            "issuedAt": self.issued_at,
            "refreshable": self.refreshable,
        })
    }
}

impl FromJson for AccessTokenRecord {
    fn from_json(value: &Value) -> StoreResult<Self> {
        Ok(AccessTokenRecord {
            user: require_str(value, "user")?.to_string(),
            device: require_str(value, "device")?.to_string(),
            lifetime: value.get("lifetime").and_then(Value::as_u64),
            issued_at: require_u64(value, "issuedAt")?,
            refreshable: value
                .get("refreshable")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub refreshes: String,
}

impl ToJson for RefreshTokenRecord {
    fn to_json(&self) -> Value {
        json!({"refreshes": self.refreshes})
    }
}

impl FromJson for RefreshTokenRecord {
    fn from_json(value: &Value) -> StoreResult<Self> {
        Ok(RefreshTokenRecord {
            refreshes: require_str(value, "refreshes")?.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationTokenRecord {
    pub name: String,
    pub created_by: Option<String>,
    pub created_on: u64,
    /// 0 means "never expires".
    pub expires_on: u64,
    /// -1 means unbounded.
    pub uses: i64,
    pub used: i64,
    pub grants: Privileges,
}

impl RegistrationTokenRecord {
    /// `(expiresOn==0 ∨ now<expiresOn) ∧ (uses==-1 ∨ used<uses)` (§3, §8).
    pub fn is_valid(&self, now: u64) -> bool {
        (self.expires_on == 0 || now < self.expires_on) && (self.uses == -1 || self.used < self.uses)
    }
}

impl ToJson for RegistrationTokenRecord {
    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "createdBy": self.created_by,
            "createdOn": self.created_on,
            "expiresOn": self.expires_on,
            "uses": self.uses,
            "used": self.used,
            "grants": self.grants,
        })
    }
}

impl FromJson for RegistrationTokenRecord {
    fn from_json(value: &Value) -> StoreResult<Self> {
        let grants = match value.get("grants").and_then(Value::as_array) {
            Some(names) => Privileges::decode(names.iter().filter_map(Value::as_str)),
            None => Privileges::NONE,
        };
        Ok(RegistrationTokenRecord {
            name: require_str(value, "name")?.to_string(),
            created_by: value.get("createdBy").and_then(Value::as_str).map(str::to_string),
            created_on: require_u64(value, "createdOn")?,
            expires_on: value.get("expiresOn").and_then(Value::as_u64).unwrap_or(0),
            uses: require_i64(value, "uses")?,
            used: value.get("used").and_then(Value::as_i64).unwrap_or(0),
            grants,
        })
    }
}

fn access_path(token: &str) -> StoreResult<Path> {
    Path::new(["tokens", "access", token])
}

fn refresh_path(token: &str) -> StoreResult<Path> {
    Path::new(["tokens", "refresh", token])
}

/// Registration token names allow `[A-Za-z0-9._~-]` (one character,
/// `~`, wider than `Path`'s own `[A-Za-z0-9._-]` component charset).
/// Escape it with an underscore-led hex sequence, doubling genuine
/// underscores first so the mapping never collides between two
/// distinct names.
fn encode_token_name_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'_' => out.push_str("__"),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' => out.push(byte as char),
            other => out.push_str(&format!("_{other:02x}")),
        }
    }
    out
}

fn registration_path(name: &str) -> StoreResult<Path> {
    Path::new(["tokens", "registration", &encode_token_name_component(name)])
}

/// Generate and persist a new access token for `(user, device)`.
pub fn mint_access_token(
    store: &ObjectStore,
    user: &str,
    device: &str,
    lifetime: Option<u64>,
    refreshable: bool,
) -> StoreResult<(String, AccessTokenRecord)> {
    loop {
        let token_string = generate_token_string();
        let path = access_path(&token_string)?;
        if store.exists(&path) {
            continue; // collision on a freshly generated CSPRNG string: astronomically unlikely, retry anyway
        }
        let record = AccessTokenRecord {
            user: user.to_string(),
            device: device.to_string(),
            lifetime,
            issued_at: now_ms(),
            refreshable,
        };
        match store.create(&path, &record.to_json()) {
            Ok(()) => return Ok((token_string, record)),
            Err(StoreError::Exists(_)) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Generate and persist a refresh token pointing at `access_token`.
pub fn mint_refresh_token(store: &ObjectStore, access_token: &str) -> StoreResult<String> {
    loop {
        let token_string = generate_token_string();
        let path = refresh_path(&token_string)?;
        if store.exists(&path) {
            continue;
        }
        let record = RefreshTokenRecord {
            refreshes: access_token.to_string(),
        };
        match store.create(&path, &record.to_json()) {
            Ok(()) => return Ok(token_string),
            Err(StoreError::Exists(_)) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Look up the access token record without consuming it, for
/// authentication checks that don't need to mutate it.
pub fn peek_access_token(store: &ObjectStore, token: &str) -> Result<AccessTokenRecord, MatrixError> {
    let path = access_path(token).map_err(|_| MatrixError::new(ErrorKind::UnknownToken))?;
    let obj = store
        .lock(&path)
        .map_err(|_| MatrixError::new(ErrorKind::UnknownToken))?;
    let record = AccessTokenRecord::from_json(obj.json()).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    obj.discard().map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    if record.is_expired(now_ms()) {
        return Err(MatrixError::new(ErrorKind::UnknownToken));
    }
    Ok(record)
}

pub fn delete_access_token(store: &ObjectStore, token: &str) -> StoreResult<()> {
    let path = access_path(token)?;
    match store.delete(&path) {
        Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn delete_refresh_token(store: &ObjectStore, token: &str) -> StoreResult<()> {
    let path = refresh_path(token)?;
    match store.delete(&path) {
        Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sweep `tokens/access` for records past their lifetime and delete
/// them (§4.11's `TokenCleanup` job). The paired refresh token, if
/// any, is untouched: it still lets the client mint a fresh access
/// token via [`refresh`]. Returns the number of tokens removed.
pub fn cleanup_expired(store: &ObjectStore) -> StoreResult<usize> {
    let prefix = Path::new(["tokens", "access"])?;
    let now = now_ms();
    let mut removed = 0;
    for name in store.list(&prefix)? {
        let path = match access_path(&name) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let obj = match store.lock(&path) {
            Ok(obj) => obj,
            Err(_) => continue,
        };
        let expired = AccessTokenRecord::from_json(obj.json())
            .map(|record| record.is_expired(now))
            .unwrap_or(false);
        if expired {
            if obj.discard().is_ok() && store.delete(&path).is_ok() {
                removed += 1;
            }
        } else {
            let _ = obj.discard();
        }
    }
    Ok(removed)
}

/// Result of a successful refresh rotation (§4.5, §8).
pub struct Refreshed {
    pub access_token: String,
    pub record: AccessTokenRecord,
}

/// Atomically rotate a refresh token: lock refresh -> lock old access ->
/// mint new access -> rewrite refresh's pointer -> delete old access.
/// Any failure aborts, releasing whatever locks were taken and leaving
/// the prior access token valid (§4.5, §8).
pub fn refresh(store: &ObjectStore, refresh_token: &str) -> Result<Refreshed, MatrixError> {
    let refresh_doc_path =
        refresh_path(refresh_token).map_err(|_| MatrixError::new(ErrorKind::UnknownToken))?;
    let mut refresh_obj = store
        .lock(&refresh_doc_path)
        .map_err(|_| MatrixError::new(ErrorKind::UnknownToken))?;
    let refresh_record = match RefreshTokenRecord::from_json(refresh_obj.json()) {
        Ok(r) => r,
        Err(_) => {
            let _ = refresh_obj.discard();
            return Err(MatrixError::new(ErrorKind::Unknown));
        }
    };

    let old_access_path = match access_path(&refresh_record.refreshes) {
        Ok(p) => p,
        Err(_) => {
            let _ = refresh_obj.discard();
            return Err(MatrixError::new(ErrorKind::Unknown));
        }
    };
    let old_access_obj = match store.lock(&old_access_path) {
        Ok(obj) => obj,
        Err(_) => {
            let _ = refresh_obj.discard();
            return Err(MatrixError::new(ErrorKind::UnknownToken));
        }
    };
    let old_record = match AccessTokenRecord::from_json(old_access_obj.json()) {
        Ok(r) => r,
        Err(_) => {
            let _ = old_access_obj.discard();
            let _ = refresh_obj.discard();
            return Err(MatrixError::new(ErrorKind::Unknown));
        }
    };

    let (new_token, new_record) = match mint_access_token(
        store,
        &old_record.user,
        &old_record.device,
        old_record.lifetime,
        old_record.refreshable,
    ) {
        Ok(v) => v,
        Err(_) => {
            let _ = old_access_obj.discard();
            let _ = refresh_obj.discard();
            return Err(MatrixError::new(ErrorKind::Unknown));
        }
    };

    refresh_obj.set_json(RefreshTokenRecord { refreshes: new_token.clone() }.to_json());
    if refresh_obj.commit().is_err() {
        let _ = delete_access_token(store, &new_token);
        let _ = old_access_obj.discard();
        return Err(MatrixError::new(ErrorKind::Unknown));
    }

    if old_access_obj.discard().is_err() {
        return Err(MatrixError::new(ErrorKind::Unknown));
    }
    if delete_access_token(store, &refresh_record.refreshes).is_err() {
        return Err(MatrixError::new(ErrorKind::Unknown));
    }

    // Update the user's device entry to point at the rotated token
    // (§4.5's atomic-refresh step list). A failure here is not
    // rolled back: the new token is already the one valid credential,
    // and the device entry is advisory bookkeeping, not the source of
    // truth for authentication.
    if let Ok((mut user, user_obj)) = crate::user::lock(store, &old_record.user) {
        if let Some(device) = user.devices.get_mut(&old_record.device) {
            device.access_token = new_token.clone();
            let _ = crate::user::unlock(user_obj, &user);
        } else {
            let _ = user_obj.discard();
        }
    }

    Ok(Refreshed {
        access_token: new_token,
        record: new_record,
    })
}

/// Create a registration token, enforcing the invariants of §3/§8.
pub fn create_registration_token(
    store: &ObjectStore,
    name: &str,
    created_by: Option<String>,
    expires_on: u64,
    uses: i64,
    grants: Privileges,
) -> Result<RegistrationTokenRecord, MatrixError> {
    if name.is_empty()
        || name.len() > 64
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-'))
    {
        return Err(MatrixError::with_message(
            ErrorKind::InvalidParam,
            "registration token name must be <=64 chars of [A-Za-z0-9._~-]",
        ));
    }
    if uses < -1 {
        return Err(MatrixError::with_message(ErrorKind::InvalidParam, "uses must be -1 or >= 0"));
    }
    let now = now_ms();
    if expires_on != 0 && expires_on < now {
        return Err(MatrixError::with_message(
            ErrorKind::InvalidParam,
            "expiresOn must be in the future",
        ));
    }

    let record = RegistrationTokenRecord {
        name: name.to_string(),
        created_by,
        created_on: now,
        expires_on,
        uses,
        used: 0,
        grants,
    };

    let path = registration_path(name).map_err(|_| MatrixError::new(ErrorKind::InvalidParam))?;
    match store.create(&path, &record.to_json()) {
        Ok(()) => Ok(record),
        Err(StoreError::Exists(_)) => Err(MatrixError::with_message(
            ErrorKind::InvalidParam,
            "a registration token with that name already exists",
        )),
        Err(_) => Err(MatrixError::new(ErrorKind::Unknown)),
    }
}

/// Look up a registration token and check its validity, without
/// consuming a use.
pub fn peek_registration_token(store: &ObjectStore, name: &str) -> Option<RegistrationTokenRecord> {
    let path = registration_path(name).ok()?;
    let obj = store.lock(&path).ok()?;
    let record = RegistrationTokenRecord::from_json(obj.json()).ok();
    let _ = obj.discard();
    record
}

/// Increment `used` on a registration token. The caller is expected to
/// have already checked [`RegistrationTokenRecord::is_valid`] (§4.5).
pub fn use_registration_token(store: &ObjectStore, name: &str) -> StoreResult<()> {
    let path = registration_path(name)?;
    let mut obj = store.lock(&path)?;
    let mut record = RegistrationTokenRecord::from_json(obj.json())?;
    record.used += 1;
    obj.set_json(record.to_json());
    obj.commit()
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
    fn mint_and_peek_access_token() {
        let (_dir, store) = store();
        let (token, record) = mint_access_token(&store, "alice", "DEVICE1", None, false).unwrap();
        assert_eq!(record.user, "alice");
        let peeked = peek_access_token(&store, &token).unwrap();
        assert_eq!(peeked, record);
    }

    #[test]
    fn expired_access_token_is_reported_as_unknown() {
        let (_dir, store) = store();
        let (token, _) = mint_access_token(&store, "alice", "DEVICE1", Some(0), true).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = peek_access_token(&store, &token).unwrap_err();
        assert_eq!(err.errcode, "M_UNKNOWN_TOKEN");
    }

    #[test]
    fn refresh_rotates_the_access_token_and_invalidates_the_old_one() {
        let (_dir, store) = store();
        let (access, _) = mint_access_token(&store, "alice", "DEVICE1", Some(3_600_000), true).unwrap();
        let refresh_token = mint_refresh_token(&store, &access).unwrap();

        let rotated = refresh(&store, &refresh_token).unwrap();
        assert_ne!(rotated.access_token, access);
        assert!(peek_access_token(&store, &access).is_err());
        assert!(peek_access_token(&store, &rotated.access_token).is_ok());

        // the same refresh token can be used again, rotating further
        let rotated_again = refresh(&store, &refresh_token).unwrap();
        assert_ne!(rotated_again.access_token, rotated.access_token);
    }

    #[test]
    fn refresh_with_unknown_token_fails() {
        let (_dir, store) = store();
        let err = refresh(&store, "not-a-real-refresh-token").unwrap_err();
        assert_eq!(err.errcode, "M_UNKNOWN_TOKEN");
    }

    #[test]
    fn cleanup_expired_removes_only_expired_access_tokens() {
        let (_dir, store) = store();
        let (expired, _) = mint_access_token(&store, "alice", "DEVICE1", Some(0), false).unwrap();
        let (live, _) = mint_access_token(&store, "alice", "DEVICE2", Some(3_600_000), false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let removed = cleanup_expired(&store).unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists(&access_path(&expired).unwrap()));
        assert!(store.exists(&access_path(&live).unwrap()));
    }

    #[test]
    fn registration_token_create_rejects_uses_below_negative_one() {
        let (_dir, store) = store();
        let err =
            create_registration_token(&store, "welcome", None, 0, -2, Privileges::NONE).unwrap_err();
        assert_eq!(err.errcode, "M_INVALID_PARAM");
    }

    #[test]
    fn registration_token_create_rejects_a_past_expiry() {
        let (_dir, store) = store();
        let err =
            create_registration_token(&store, "welcome", None, 1, 1, Privileges::NONE).unwrap_err();
        assert_eq!(err.errcode, "M_INVALID_PARAM");
    }

    #[test]
    fn registration_token_exhausts_after_its_use_count() {
        let (_dir, store) = store();
        let record =
            create_registration_token(&store, "welcome", None, 0, 2, Privileges::NONE).unwrap();
        assert!(record.is_valid(now_ms()));

        use_registration_token(&store, "welcome").unwrap();
        let record = peek_registration_token(&store, "welcome").unwrap();
        assert!(record.is_valid(now_ms()));

        use_registration_token(&store, "welcome").unwrap();
        let record = peek_registration_token(&store, "welcome").unwrap();
        assert!(!record.is_valid(now_ms()));
        assert_eq!(record.used, 2);
    }

    #[test]
    fn unbounded_registration_token_never_exhausts_on_use_count() {
        let (_dir, store) = store();
        create_registration_token(&store, "forever", None, 0, -1, Privileges::NONE).unwrap();
        for _ in 0..5 {
            use_registration_token(&store, "forever").unwrap();
        }
        let record = peek_registration_token(&store, "forever").unwrap();
        assert!(record.is_valid(now_ms()));
    }

    #[test]
    fn registration_token_name_containing_a_tilde_is_usable() {
        let (_dir, store) = store();
        let record =
            create_registration_token(&store, "welcome~vip", None, 0, -1, Privileges::NONE).unwrap();
        assert_eq!(record.name, "welcome~vip");

        let fetched = peek_registration_token(&store, "welcome~vip").unwrap();
        assert_eq!(fetched.name, "welcome~vip");
        use_registration_token(&store, "welcome~vip").unwrap();
    }
}
