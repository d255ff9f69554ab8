// =============================================================================
// Matrixon Homeserver Core - Password Hashing
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
//   Argon2id password hashing with a tagged {scheme, salt, hash} record shape, 
//   so a future non-Argon2id scheme doesn't require a storage migration.
//
// Performance Targets:
//   • Argon2id's own default work factor, no custom tuning
//
// Architecture:
//   • Scheme tag checked before verification, not assumed
// =============================================================================

//! Password hashing (§4.6, §9's REDESIGN FLAG): Argon2id instead of
//! the source's salted SHA-256, keeping the `{salt, hash}` record shape
//! and adding a `scheme` tag for forward compatibility.

use argon2::Argon2;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// A tagged, storable password hash record. Exactly one scheme exists
/// today (`argon2id`); the tag exists so a future scheme can be added
/// without breaking documents already on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    pub scheme: String,
    pub salt: String,
    pub hash: String,
}

/// Hash `password` with a freshly generated random salt.
pub fn hash(password: &str) -> PasswordHash {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_with_salt(password, &salt)
}

fn hash_with_salt(password: &str, salt: &[u8]) -> PasswordHash {
    let mut output = [0u8; HASH_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut output)
        .expect("argon2id hashing with a fixed-size buffer cannot fail");
    PasswordHash {
        scheme: "argon2id".to_string(),
        salt: STANDARD_NO_PAD.encode(salt),
        hash: STANDARD_NO_PAD.encode(output),
    }
}

/// Verify `candidate` against a stored record in constant time.
pub fn verify(record: &PasswordHash, candidate: &str) -> bool {
    if record.scheme != "argon2id" {
        return false;
    }
    let Ok(salt) = STANDARD_NO_PAD.decode(&record.salt) else {
        return false;
    };
    let Ok(expected) = STANDARD_NO_PAD.decode(&record.hash) else {
        return false;
    };
    let mut output = vec![0u8; expected.len()];
    if Argon2::default()
        .hash_password_into(candidate.as_bytes(), &salt, &mut output)
        .is_err()
    {
        return false;
    }
    constant_time_eq(&expected, &output)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_password_verifies() {
        let record = hash("hunter2");
        assert!(verify(&record, "hunter2"));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let record = hash("hunter2");
        assert!(!verify(&record, "hunter3"));
    }

    #[test]
    fn two_hashes_of_the_same_password_use_different_salts() {
        let a = hash("hunter2");
        let b = hash("hunter2");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn unknown_scheme_never_verifies() {
        let mut record = hash("hunter2");
        record.scheme = "sha256".to_string();
        assert!(!verify(&record, "hunter2"));
    }
}
