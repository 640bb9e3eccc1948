// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! The `Display` text of an [`AuthError`] is for server-side logs and may name
//! the claim or network failure involved. Clients only ever see
//! [`AuthError::public_message`] and [`AuthError::error_code`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Authentication error type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider redirected back with an `error` parameter instead of a code.
    #[error("identity provider denied the request: {error}")]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    /// Callback arrived without an authorization code.
    #[error("authorization code missing from callback")]
    MissingCode,

    /// Anti-forgery `state` missing, mismatched, or expired.
    #[error("anti-forgery state missing, mismatched or expired")]
    StateMismatch,

    /// Token endpoint answered with a non-2xx status.
    #[error("token endpoint returned HTTP {status}: {reason}")]
    ExchangeFailed { status: u16, reason: String },

    /// Token endpoint could not be reached or answered with garbage.
    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// Token could not be parsed at all.
    #[error("token is malformed")]
    MalformedToken,

    /// No trusted key matches the token's key id, even after a refresh.
    #[error("no signing key found for kid {0}")]
    UnknownKey(String),

    /// Signature does not verify under the resolved key.
    #[error("token signature is invalid")]
    BadSignature,

    /// `exp` is at or before now minus the clock skew allowance.
    #[error("token has expired")]
    ExpiredToken,

    /// A claim other than `exp` failed validation. Names the claim.
    #[error("token claim `{0}` is invalid")]
    InvalidClaims(&'static str),

    /// No session cookie on a protected request.
    #[error("no session cookie present")]
    NotAuthenticated,

    /// Session cookie holds an expired token.
    #[error("session token has expired")]
    ExpiredSession,

    /// Session cookie holds a token that failed verification.
    #[error("session token is invalid: {0}")]
    InvalidSession(Box<AuthError>),

    /// Key set document could not be fetched or parsed.
    #[error("failed to fetch signing key set: {0}")]
    KeySetFetch(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: &'static str,
    error_code: &'static str,
}

impl AuthError {
    /// Stable machine-readable code. Never names a claim or a network detail.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::ProviderDenied { .. } => "provider_denied",
            AuthError::MissingCode => "missing_code",
            AuthError::StateMismatch => "state_mismatch",
            AuthError::ExchangeFailed { .. } => "exchange_failed",
            AuthError::ProviderUnreachable(_) => "provider_unreachable",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::BadSignature => "bad_signature",
            AuthError::ExpiredToken => "expired_token",
            AuthError::InvalidClaims(_) => "invalid_claims",
            AuthError::NotAuthenticated => "not_authenticated",
            AuthError::ExpiredSession => "expired_session",
            AuthError::InvalidSession(_) => "invalid_session",
            AuthError::KeySetFetch(_) => "key_set_unavailable",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::ProviderDenied { .. }
            | AuthError::MissingCode
            | AuthError::StateMismatch => StatusCode::BAD_REQUEST,
            AuthError::MalformedToken
            | AuthError::UnknownKey(_)
            | AuthError::BadSignature
            | AuthError::ExpiredToken
            | AuthError::InvalidClaims(_)
            | AuthError::NotAuthenticated
            | AuthError::ExpiredSession
            | AuthError::InvalidSession(_) => StatusCode::UNAUTHORIZED,
            AuthError::ExchangeFailed { .. } | AuthError::ProviderUnreachable(_) => {
                StatusCode::BAD_GATEWAY
            }
            AuthError::KeySetFetch(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Generic, client-safe message.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::NotAuthenticated => "Not authenticated",
            AuthError::ExpiredSession => "Session expired, please log in again",
            AuthError::InvalidSession(_) => "Invalid session, please log in again",
            AuthError::ExchangeFailed { .. }
            | AuthError::ProviderUnreachable(_)
            | AuthError::KeySetFetch(_) => "Authentication service unavailable",
            _ => "Authentication failed",
        }
    }

    /// Map a verification failure seen while reading a session cookie to the
    /// session-level taxonomy. Every failure ends in 401.
    pub fn into_session_error(self) -> AuthError {
        match self {
            AuthError::ExpiredToken | AuthError::ExpiredSession => AuthError::ExpiredSession,
            AuthError::NotAuthenticated => AuthError::NotAuthenticated,
            AuthError::InvalidSession(inner) => AuthError::InvalidSession(inner),
            other => AuthError::InvalidSession(Box::new(other)),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, error_code = self.error_code(), "Authentication error");
        } else {
            tracing::debug!(error = %self, error_code = self.error_code(), "Authentication rejected");
        }

        let body = Json(AuthErrorBody {
            error: self.public_message(),
            error_code: self.error_code(),
        });
        (status, body).into_response()
    }
}
