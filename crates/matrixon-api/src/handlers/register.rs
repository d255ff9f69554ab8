// =============================================================================
// Matrixon Homeserver Core - Registration Endpoint
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
//   UIA-gated account registration (registration-token or dummy/captcha flows) 
//   plus the registration-token validity probe.
//
// Performance Targets:
//   • One object-store lock per new account
//
// Architecture:
//   • Registration flows are computed per-request from live Config
// =============================================================================

//! `POST /_matrix/client/v3/register` and the registration-token
//! validity probe (§4.10).

use crate::ctx::{ok, HandlerCtx, HandlerResult};
use crate::handlers::{full_user_id, generate_device_id};
use crate::uia::{self, Flow, StageInput, STAGE_DUMMY, STAGE_RECAPTCHA, STAGE_REGISTRATION_TOKEN};
use matrixon_common::{ErrorKind, MatrixError};
use matrixon_core::{Config, Privileges};
use matrixon_users::{token, user};
use serde_json::json;

/// Registration always accepts a valid registration token (an
/// invite-only escape hatch independent of the `registration` toggle);
/// the open, password-only flow is additionally offered only when
/// `Config.registration` is set, and gains an unconditionally-failing
/// `m.login.recaptcha` stage when `Config.captcha.enabled` (§4.7's
/// captcha supplement).
fn registration_flows(config: &Config) -> Vec<Flow> {
    let mut flows = vec![Flow(vec![STAGE_REGISTRATION_TOKEN])];
    if config.registration {
        if config.captcha.enabled {
            flows.push(Flow(vec![STAGE_RECAPTCHA, STAGE_DUMMY]));
        } else {
            flows.push(Flow(vec![STAGE_DUMMY]));
        }
    }
    flows
}

fn random_localpart() -> String {
    format!("user{}", &uuid::Uuid::new_v4().simple().to_string()[..10])
}

pub fn post(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let body = ctx.json_body()?;
    let config = ctx
        .state
        .current_config()
        .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    let flows = registration_flows(&config);

    let input = StageInput::from_auth_value(body.get("auth"));
    let outcome = uia::complete(&ctx.state.store, &flows, &input)?;
    let completion = match outcome {
        uia::Outcome::Pending(r) => return Ok((r.status, r.body)),
        uia::Outcome::Done(c) => c,
    };

    let localpart = body
        .get("username")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(random_localpart);
    let password = body
        .get("password")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| MatrixError::with_message(ErrorKind::MissingParam, "missing field 'password'"))?;

    let grants = completion
        .session
        .params
        .get("registration_token_grants")
        .and_then(serde_json::Value::as_array)
        .map(|names| Privileges::decode(names.iter().filter_map(serde_json::Value::as_str)))
        .unwrap_or(Privileges::NONE);

    let mut new_user = user::create(&ctx.state.store, &localpart, password, grants)?;

    let device_id = body
        .get("device_id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(generate_device_id);
    let display_name = body
        .get("initial_device_display_name")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let (access_token, _) = token::mint_access_token(&ctx.state.store, &localpart, &device_id, None, true)
        .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    let refresh_token = token::mint_refresh_token(&ctx.state.store, &access_token)
        .map_err(|_| MatrixError::new(ErrorKind::Unknown))?;

    user::set_device(
        &mut new_user,
        device_id.clone(),
        user::Device {
            access_token: access_token.clone(),
            refresh_token: Some(refresh_token.clone()),
            display_name,
            last_seen: token::now_ms(),
        },
    );
    let (_, obj) = user::lock(&ctx.state.store, &localpart).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;
    user::unlock(obj, &new_user).map_err(|_| MatrixError::new(ErrorKind::Unknown))?;

    ok(json!({
        "user_id": full_user_id(&localpart, &ctx.state.server_name),
        "access_token": access_token,
        "refresh_token": refresh_token,
        "device_id": device_id,
    }))
}

/// `POST /_matrix/client/v1/register/m.login.registration_token/validity`.
pub fn token_validity(ctx: &HandlerCtx, _captures: &[String]) -> HandlerResult {
    let token_string = ctx
        .query_param("token")
        .map(str::to_string)
        .or_else(|| ctx.json_body().ok().and_then(|b| b.get("token").and_then(serde_json::Value::as_str).map(str::to_string)))
        .ok_or_else(|| MatrixError::with_message(ErrorKind::MissingParam, "missing parameter 'token'"))?;

    let valid = token::peek_registration_token(&ctx.state.store, &token_string)
        .map(|record| record.is_valid(token::now_ms()))
        .unwrap_or(false);
    ok(json!({"valid": valid}))
}
