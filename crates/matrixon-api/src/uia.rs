// =============================================================================
// Matrixon Homeserver Core - User-Interactive Authentication
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
//   The multi-stage, session-based auth engine backing registration and 
//   account-sensitive operations: session persistence, per-stage dispatch, and 
//   the completion algorithm that turns a finished session into a grant.
//
// Performance Targets:
//   • One object-store lock per stage submission
//
// Architecture:
//   • Session state persisted between requests, not held in memory
// =============================================================================

//! User-Interactive Authentication (§4.7).
//!
//! A [`Flow`] is an ordered list of stage type strings; satisfying any
//! one flow completes authentication. [`complete`] implements the
//! five-step algorithm verbatim: allocate a session on the first
//! request, validate the session and next stage on subsequent ones,
//! run the stage-specific verifier, and report either completion or
//! the remaining-stages `401`.

use http::StatusCode;
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_db::{FromJson, ObjectStore, Path, StoreError, StoreResult, ToJson};
use matrixon_users::{token, user};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

pub const STAGE_DUMMY: &str = "m.login.dummy";
pub const STAGE_PASSWORD: &str = "m.login.password";
pub const STAGE_REGISTRATION_TOKEN: &str = "m.login.registration_token";
pub const STAGE_RECAPTCHA: &str = "m.login.recaptcha";

/// An ordered sequence of stage types; completing every stage in any
/// one registered flow completes the session.
#[derive(Debug, Clone)]
pub struct Flow(pub Vec<&'static str>);

#[derive(Debug, Clone, Default)]
pub struct UiaSession {
    pub session_id: String,
    pub completed: BTreeSet<String>,
    pub user: Option<String>,
    pub params: Map<String, Value>,
}

impl ToJson for UiaSession {
    fn to_json(&self) -> Value {
        json!({
            "sessionId": self.session_id,
            "completed": self.completed.iter().cloned().collect::<Vec<_>>(),
            "user": self.user,
            "params": self.params,
        })
    }
}

impl FromJson for UiaSession {
    fn from_json(value: &Value) -> StoreResult<Self> {
        let session_id = matrixon_db::schema::require_str(value, "sessionId")?.to_string();
        let completed = value
            .get("completed")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let user = value.get("user").and_then(Value::as_str).map(str::to_string);
        let params = value.get("params").and_then(Value::as_object).cloned().unwrap_or_default();
        Ok(UiaSession {
            session_id,
            completed,
            user,
            params,
        })
    }
}

fn session_path(id: &str) -> StoreResult<Path> {
    Path::new(["user_interactive", id])
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn flows_json(flows: &[Flow]) -> Value {
    json!({
        "flows": flows.iter().map(|f| json!({"stages": f.0})).collect::<Vec<_>>(),
    })
}

/// The `{errcode, error, completed, flows, params, session}` envelope
/// the Matrix client-server API specifies for an in-progress UIA
/// exchange (§4.7, §4.8).
pub struct PendingResponse {
    pub status: StatusCode,
    pub body: Value,
}

fn incomplete_response(flows: &[Flow], session: &UiaSession, forbidden: bool) -> PendingResponse {
    let mut body = flows_json(flows);
    body["session"] = json!(session.session_id);
    body["completed"] = json!(session.completed.iter().cloned().collect::<Vec<_>>());
    body["params"] = json!(session.params);
    // Spec §4.7 step 3 and §8 scenario 4 both call for `401` here even
    // though `M_FORBIDDEN` maps to `403` everywhere else (§7): a failed
    // or out-of-order UIA stage is still an authentication retry, not a
    // settled authorization decision.
    let (status, errcode, error) = if forbidden {
        (StatusCode::UNAUTHORIZED, "M_FORBIDDEN", "Invalid auth stage")
    } else {
        (StatusCode::UNAUTHORIZED, "M_UNAUTHORIZED", "Authentication required")
    };
    body["errcode"] = json!(errcode);
    body["error"] = json!(error);
    PendingResponse { status, body }
}

/// The authenticated identity or grant recorded by a completed stage,
/// handed back to the caller alongside `done=true` so it can finish
/// the outer operation (account creation, password change, ...).
pub struct Completion {
    pub session: UiaSession,
}

/// Outcome of one `complete` call.
pub enum Outcome {
    /// Not yet done; the caller should return this response verbatim.
    Pending(PendingResponse),
    Done(Completion),
}

/// Request-scoped parameters that stage verifiers need (the
/// identifier+password pair for `m.login.password`, the token string
/// for `m.login.registration_token`).
#[derive(Debug, Default)]
pub struct StageInput {
    pub stage_type: Option<String>,
    pub session: Option<String>,
    pub identifier: Option<String>,
    pub password: Option<String>,
    pub registration_token: Option<String>,
}

impl StageInput {
    pub fn from_auth_value(auth: Option<&Value>) -> Self {
        let Some(auth) = auth else { return StageInput::default() };
        StageInput {
            stage_type: auth.get("type").and_then(Value::as_str).map(str::to_string),
            session: auth.get("session").and_then(Value::as_str).map(str::to_string),
            identifier: auth
                .get("identifier")
                .and_then(|v| v.get("user"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| auth.get("user").and_then(Value::as_str).map(str::to_string)),
            password: auth.get("password").and_then(Value::as_str).map(str::to_string),
            registration_token: auth.get("token").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// Run one step of the UIA protocol (§4.7's five-step algorithm).
pub fn complete(
    store: &ObjectStore,
    flows: &[Flow],
    input: &StageInput,
) -> Result<Outcome, MatrixError> {
    // Step 1: no `auth` at all -> fresh session.
    let Some(stage_type) = &input.stage_type else {
        let session = UiaSession {
            session_id: new_session_id(),
            ..Default::default()
        };
        persist(store, &session)?;
        return Ok(Outcome::Pending(incomplete_response(flows, &session, false)));
    };

    // Step 2: unknown/missing session id.
    let session_id = input.session.clone().unwrap_or_default();
    let found = if session_id.is_empty() { None } else { load(store, &session_id)? };
    let mut session = match found {
        Some(s) => s,
        None => {
            let fresh = UiaSession {
                session_id: new_session_id(),
                ..Default::default()
            };
            persist(store, &fresh)?;
            return Ok(Outcome::Pending(incomplete_response(flows, &fresh, false)));
        }
    };

    // Step 3: the stage must be the next required one in some flow.
    if !stage_is_eligible(flows, &session, stage_type) {
        return Ok(Outcome::Pending(incomplete_response(flows, &session, true)));
    }

    // Step 4: run the stage-specific verifier.
    match stage_type.as_str() {
        STAGE_DUMMY => {
            session.completed.insert(STAGE_DUMMY.to_string());
        }
        STAGE_PASSWORD => {
            let identifier = input
                .identifier
                .as_deref()
                .ok_or_else(|| MatrixError::new(ErrorKind::MissingParam))?;
            let password = input
                .password
                .as_deref()
                .ok_or_else(|| MatrixError::new(ErrorKind::MissingParam))?;
            let localpart = matrixon_core::identifier::parse(identifier)
                .map(|id| id.local)
                .unwrap_or_else(|_| identifier.to_string());
            let verified = user::lock(store, &localpart)
                .ok()
                .map(|(u, obj)| {
                    let ok = !u.deactivated && user::check_password(&u, password);
                    let _ = obj.discard();
                    ok
                })
                .unwrap_or(false);
            if !verified {
                persist(store, &session)?;
                return Ok(Outcome::Pending(incomplete_response(flows, &session, true)));
            }
            session.user = Some(localpart);
            session.completed.insert(STAGE_PASSWORD.to_string());
        }
        STAGE_REGISTRATION_TOKEN => {
            let token_string = input
                .registration_token
                .as_deref()
                .ok_or_else(|| MatrixError::new(ErrorKind::MissingParam))?;
            let Some(record) = token::peek_registration_token(store, token_string) else {
                persist(store, &session)?;
                return Ok(Outcome::Pending(incomplete_response(flows, &session, true)));
            };
            if !record.is_valid(token::now_ms()) {
                persist(store, &session)?;
                return Ok(Outcome::Pending(incomplete_response(flows, &session, true)));
            }
            token::use_registration_token(store, token_string)
                .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
            session.params.insert(
                "registration_token_grants".to_string(),
                json!(record.grants.encode()),
            );
            session.completed.insert(STAGE_REGISTRATION_TOKEN.to_string());
        }
        STAGE_RECAPTCHA => {
            // Captcha verification is unconfigured in this deployment
            // shape: the stage exists so a flow can
            // name it, but it never succeeds until `captcha.enabled`
            // wires in a real verifier.
            persist(store, &session)?;
            return Ok(Outcome::Pending(incomplete_response(flows, &session, true)));
        }
        _ => {
            return Err(MatrixError::new(ErrorKind::Unrecognized));
        }
    }

    // Step 5: did completing this stage finish any whole flow?
    if flows.iter().any(|f| f.0.iter().all(|s| session.completed.contains(*s))) {
        let done_session = session.clone();
        delete(store, &session_id)?;
        return Ok(Outcome::Done(Completion { session: done_session }));
    }

    persist(store, &session)?;
    Ok(Outcome::Pending(incomplete_response(flows, &session, false)))
}

fn stage_is_eligible(flows: &[Flow], session: &UiaSession, stage_type: &str) -> bool {
    flows.iter().any(|flow| {
        flow.0
            .iter()
            .find(|s| !session.completed.contains(**s))
            .map(|next| *next == stage_type)
            .unwrap_or(false)
    })
}

fn load(store: &ObjectStore, id: &str) -> Result<Option<UiaSession>, MatrixError> {
    let path = session_path(id).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    match store.lock(&path) {
        Ok(obj) => {
            let session = UiaSession::from_json(obj.json()).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
            obj.discard().map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
            Ok(Some(session))
        }
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(_) => Err(MatrixError::new(ErrorKind::Unknown)),
    }
}

fn persist(store: &ObjectStore, session: &UiaSession) -> Result<(), MatrixError> {
    let path = session_path(&session.session_id).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    match store.lock_or_create(&path, || session.to_json()) {
        Ok(mut obj) => {
            obj.set_json(session.to_json());
            obj.commit().map_err(|_| MatrixError::new(ErrorKind::Unknown))
        }
        Err(_) => Err(MatrixError::new(ErrorKind::Unknown)),
    }
}

fn delete(store: &ObjectStore, id: &str) -> Result<(), MatrixError> {
    let path = session_path(id).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    match store.delete(&path) {
        Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
        Err(_) => Err(MatrixError::new(ErrorKind::Unknown)),
    }
}

/// Drop the entire `user_interactive` collection (§4.7, §4.11's
/// `UiaCleanup` cron job): coarse garbage collection bounding session
/// lifetime rather than tracking per-session expiry.
pub fn cleanup_all(store: &ObjectStore) {
    let Ok(prefix) = Path::new(["user_interactive"]) else { return };
    let Ok(names) = store.list(&prefix) else { return };
    for name in names {
        let _ = delete(store, &name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixon_core::Privileges;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn dummy_flow() -> Vec<Flow> {
        vec![Flow(vec![STAGE_DUMMY])]
    }

    #[test]
    fn first_call_with_no_auth_allocates_a_fresh_session() {
        let (_dir, store) = store();
        let outcome = complete(&store, &dummy_flow(), &StageInput::default()).unwrap();
        match outcome {
            Outcome::Pending(r) => assert_eq!(r.body["errcode"], "M_UNAUTHORIZED"),
            Outcome::Done(_) => panic!("should not complete without auth"),
        }
    }

    #[test]
    fn dummy_stage_completes_a_single_stage_flow() {
        let (_dir, store) = store();
        let first = complete(&store, &dummy_flow(), &StageInput::default()).unwrap();
        let Outcome::Pending(r) = first else { panic!() };
        let session_id = r.body["session"].as_str().unwrap().to_string();

        let input = StageInput {
            stage_type: Some(STAGE_DUMMY.to_string()),
            session: Some(session_id),
            ..Default::default()
        };
        let outcome = complete(&store, &dummy_flow(), &input).unwrap();
        assert!(matches!(outcome, Outcome::Done(_)));
    }

    #[test]
    fn unknown_session_id_is_treated_like_a_fresh_start() {
        let (_dir, store) = store();
        let input = StageInput {
            stage_type: Some(STAGE_DUMMY.to_string()),
            session: Some("not-a-real-session".to_string()),
            ..Default::default()
        };
        let outcome = complete(&store, &dummy_flow(), &input).unwrap();
        match outcome {
            Outcome::Pending(r) => {
                assert_ne!(r.body["session"].as_str().unwrap(), "not-a-real-session");
            }
            Outcome::Done(_) => panic!(),
        }
    }

    #[test]
    fn wrong_stage_type_is_forbidden() {
        let (_dir, store) = store();
        let first = complete(&store, &dummy_flow(), &StageInput::default()).unwrap();
        let Outcome::Pending(r) = first else { panic!() };
        let session_id = r.body["session"].as_str().unwrap().to_string();

        let input = StageInput {
            stage_type: Some(STAGE_PASSWORD.to_string()),
            session: Some(session_id),
            ..Default::default()
        };
        let outcome = complete(&store, &dummy_flow(), &input).unwrap();
        let Outcome::Pending(r) = outcome else { panic!() };
        assert_eq!(r.body["errcode"], "M_FORBIDDEN");
        assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn registration_token_stage_records_grants_and_consumes_a_use() {
        let (_dir, store) = store();
        token::create_registration_token(&store, "welcome", None, 0, 1, Privileges::NONE).unwrap();
        let flows = vec![Flow(vec![STAGE_REGISTRATION_TOKEN])];

        let first = complete(&store, &flows, &StageInput::default()).unwrap();
        let Outcome::Pending(r) = first else { panic!() };
        let session_id = r.body["session"].as_str().unwrap().to_string();

        let input = StageInput {
            stage_type: Some(STAGE_REGISTRATION_TOKEN.to_string()),
            session: Some(session_id),
            registration_token: Some("welcome".to_string()),
            ..Default::default()
        };
        let outcome = complete(&store, &flows, &input).unwrap();
        assert!(matches!(outcome, Outcome::Done(_)));

        let record = token::peek_registration_token(&store, "welcome").unwrap();
        assert_eq!(record.used, 1);
        assert!(!record.is_valid(token::now_ms()));
    }

    #[test]
    fn cleanup_all_removes_every_session() {
        let (_dir, store) = store();
        complete(&store, &dummy_flow(), &StageInput::default()).unwrap();
        complete(&store, &dummy_flow(), &StageInput::default()).unwrap();
        let prefix = Path::new(["user_interactive"]).unwrap();
        assert_eq!(store.list(&prefix).unwrap().len(), 2);
        cleanup_all(&store);
        assert!(store.list(&prefix).unwrap().is_empty());
    }
}
