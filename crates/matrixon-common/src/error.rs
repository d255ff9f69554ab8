// =============================================================================
// Matrixon Homeserver Core - Matrix Error Envelope
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
//   The kind -> HTTP status and kind -> default message mappings behind every 
//   {errcode, error} response body this core ever returns.
//
// Performance Targets:
//   • Const-evaluable status/errcode/message lookups
//
// Architecture:
//   • One ErrorKind enum shared by every crate above matrixon-db
// =============================================================================

//! The Matrix `{errcode, error}` envelope (§4.8, §7).
//!
//! Every fallible operation in the homeserver core that can be observed
//! by a client eventually resolves to a [`MatrixError`]. Handlers are
//! responsible for picking the right [`ErrorKind`]; this module owns the
//! kind -> HTTP status and kind -> default message mappings so those stay
//! consistent across every call site.

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// The `M_*` error codes used by the core (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Forbidden,
    UnknownToken,
    MissingToken,
    BadJson,
    NotJson,
    NotFound,
    LimitExceeded,
    Unknown,
    Unrecognized,
    Unauthorized,
    UserDeactivated,
    UserInUse,
    InvalidUsername,
    RoomInUse,
    InvalidRoomState,
    ThreepidInUse,
    ThreepidNotFound,
    ThreepidAuthFailed,
    ThreepidDenied,
    ServerNotTrusted,
    UnsupportedRoomVersion,
    IncompatibleRoomVersion,
    BadState,
    GuestAccessForbidden,
    CaptchaNeeded,
    CaptchaInvalid,
    MissingParam,
    InvalidParam,
    TooLarge,
    Exclusive,
    ResourceLimitExceeded,
    CannotLeaveServerNoticeRoom,
}

impl ErrorKind {
    /// The `M_…` errcode string sent to clients.
    pub const fn errcode(self) -> &'static str {
        match self {
            ErrorKind::Forbidden => "M_FORBIDDEN",
            ErrorKind::UnknownToken => "M_UNKNOWN_TOKEN",
            ErrorKind::MissingToken => "M_MISSING_TOKEN",
            ErrorKind::BadJson => "M_BAD_JSON",
            ErrorKind::NotJson => "M_NOT_JSON",
            ErrorKind::NotFound => "M_NOT_FOUND",
            ErrorKind::LimitExceeded => "M_LIMIT_EXCEEDED",
            ErrorKind::Unknown => "M_UNKNOWN",
            ErrorKind::Unrecognized => "M_UNRECOGNIZED",
            ErrorKind::Unauthorized => "M_UNAUTHORIZED",
            ErrorKind::UserDeactivated => "M_USER_DEACTIVATED",
            ErrorKind::UserInUse => "M_USER_IN_USE",
            ErrorKind::InvalidUsername => "M_INVALID_USERNAME",
            ErrorKind::RoomInUse => "M_ROOM_IN_USE",
            ErrorKind::InvalidRoomState => "M_INVALID_ROOM_STATE",
            ErrorKind::ThreepidInUse => "M_THREEPID_IN_USE",
            ErrorKind::ThreepidNotFound => "M_THREEPID_NOT_FOUND",
            ErrorKind::ThreepidAuthFailed => "M_THREEPID_AUTH_FAILED",
            ErrorKind::ThreepidDenied => "M_THREEPID_DENIED",
            ErrorKind::ServerNotTrusted => "M_SERVER_NOT_TRUSTED",
            ErrorKind::UnsupportedRoomVersion => "M_UNSUPPORTED_ROOM_VERSION",
            ErrorKind::IncompatibleRoomVersion => "M_INCOMPATIBLE_ROOM_VERSION",
            ErrorKind::BadState => "M_BAD_STATE",
            ErrorKind::GuestAccessForbidden => "M_GUEST_ACCESS_FORBIDDEN",
            ErrorKind::CaptchaNeeded => "M_CAPTCHA_NEEDED",
            ErrorKind::CaptchaInvalid => "M_CAPTCHA_INVALID",
            ErrorKind::MissingParam => "M_MISSING_PARAM",
            ErrorKind::InvalidParam => "M_INVALID_PARAM",
            ErrorKind::TooLarge => "M_TOO_LARGE",
            ErrorKind::Exclusive => "M_EXCLUSIVE",
            ErrorKind::ResourceLimitExceeded => "M_RESOURCE_LIMIT_EXCEEDED",
            ErrorKind::CannotLeaveServerNoticeRoom => "M_CANNOT_LEAVE_SERVER_NOTICE_ROOM",
        }
    }

    /// The HTTP status this kind maps to.
    pub const fn status(self) -> StatusCode {
        match self {
            ErrorKind::MissingToken
            | ErrorKind::UnknownToken
            | ErrorKind::Unauthorized
            | ErrorKind::UserDeactivated
            | ErrorKind::ThreepidAuthFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden
            | ErrorKind::ThreepidDenied
            | ErrorKind::GuestAccessForbidden
            | ErrorKind::ServerNotTrusted
            | ErrorKind::Exclusive
            | ErrorKind::CannotLeaveServerNoticeRoom => StatusCode::FORBIDDEN,
            ErrorKind::NotFound | ErrorKind::ThreepidNotFound => StatusCode::NOT_FOUND,
            ErrorKind::LimitExceeded | ErrorKind::ResourceLimitExceeded => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorKind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::UserInUse
            | ErrorKind::RoomInUse
            | ErrorKind::ThreepidInUse => StatusCode::BAD_REQUEST,
            ErrorKind::Unrecognized => StatusCode::BAD_REQUEST,
            ErrorKind::BadJson
            | ErrorKind::NotJson
            | ErrorKind::InvalidUsername
            | ErrorKind::InvalidRoomState
            | ErrorKind::UnsupportedRoomVersion
            | ErrorKind::IncompatibleRoomVersion
            | ErrorKind::BadState
            | ErrorKind::CaptchaNeeded
            | ErrorKind::CaptchaInvalid
            | ErrorKind::MissingParam
            | ErrorKind::InvalidParam => StatusCode::BAD_REQUEST,
        }
    }

    /// The message used when a handler doesn't supply its own.
    pub const fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::UnknownToken => "Unrecognised access token",
            ErrorKind::MissingToken => "Missing access token",
            ErrorKind::BadJson => "Malformed JSON request body",
            ErrorKind::NotJson => "Request body is not valid JSON",
            ErrorKind::NotFound => "Not found",
            ErrorKind::LimitExceeded => "Too many requests",
            ErrorKind::Unknown => "Internal server error",
            ErrorKind::Unrecognized => "Unrecognized request",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::UserDeactivated => "This account has been deactivated",
            ErrorKind::UserInUse => "Username is already taken",
            ErrorKind::InvalidUsername => "Invalid username",
            ErrorKind::RoomInUse => "Room alias already in use",
            ErrorKind::InvalidRoomState => "Invalid room state",
            ErrorKind::ThreepidInUse => "Third-party identifier already in use",
            ErrorKind::ThreepidNotFound => "Third-party identifier not found",
            ErrorKind::ThreepidAuthFailed => "Third-party identifier verification failed",
            ErrorKind::ThreepidDenied => "Third-party identifier is not allowed",
            ErrorKind::ServerNotTrusted => "Untrusted server",
            ErrorKind::UnsupportedRoomVersion => "Unsupported room version",
            ErrorKind::IncompatibleRoomVersion => "Incompatible room version",
            ErrorKind::BadState => "Bad state",
            ErrorKind::GuestAccessForbidden => "Guest access is forbidden",
            ErrorKind::CaptchaNeeded => "A captcha is required",
            ErrorKind::CaptchaInvalid => "Captcha verification failed",
            ErrorKind::MissingParam => "Missing required parameter",
            ErrorKind::InvalidParam => "Invalid parameter",
            ErrorKind::TooLarge => "Request too large",
            ErrorKind::Exclusive => "Namespace reserved by an application service",
            ErrorKind::ResourceLimitExceeded => "Server resource limit exceeded",
            ErrorKind::CannotLeaveServerNoticeRoom => "Cannot leave the server notice room",
        }
    }
}

/// A `{errcode, error}` Matrix error, paired with the HTTP status it maps to.
#[derive(Debug, Error, Clone, Serialize)]
#[error("{errcode}: {error}")]
pub struct MatrixError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub errcode: &'static str,
    pub error: String,
}

impl MatrixError {
    /// Build an error with the kind's default message.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            errcode: kind.errcode(),
            error: kind.default_message().to_string(),
        }
    }

    /// Build an error with a custom message, e.g. to point at the
    /// specific field that failed to parse.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            errcode: kind.errcode(),
            error: message.into(),
        }
    }

    /// The HTTP status this error should be reported with.
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl From<ErrorKind> for MatrixError {
    fn from(kind: ErrorKind) -> Self {
        MatrixError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_round_trips_through_json() {
        let err = MatrixError::new(ErrorKind::UnknownToken);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["errcode"], "M_UNKNOWN_TOKEN");
        assert_eq!(json["error"], "Unrecognised access token");
    }

    #[test]
    fn custom_message_overrides_default() {
        let err = MatrixError::with_message(ErrorKind::BadJson, "missing field 'username'");
        assert_eq!(err.error, "missing field 'username'");
        assert_eq!(err.errcode, "M_BAD_JSON");
    }

    #[test]
    fn status_codes_match_errcode_families() {
        assert_eq!(
            MatrixError::new(ErrorKind::MissingToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            MatrixError::new(ErrorKind::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            MatrixError::new(ErrorKind::TooLarge).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            MatrixError::new(ErrorKind::Unknown).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
