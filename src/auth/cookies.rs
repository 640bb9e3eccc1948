// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cookie wire formats.
//!
//! [`SessionCookieCodec`] is the only code that knows how the session cookie
//! looks on the wire. It never verifies anything; the token inside is always
//! re-checked by the verifier.
//!
//! [`AuthorizationRequest`] is the short-lived anti-forgery record carried in
//! a private (encrypted) cookie between `/auth/login` and `/auth/callback`.

use axum_extra::extract::cookie::{Cookie, CookieJar, PrivateCookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use super::exchange::TokenSet;

pub const DEFAULT_SESSION_COOKIE_NAME: &str = "id_token";

const AUTH_REQUEST_COOKIE_NAME: &str = "__auth_request";
const AUTH_REQUEST_COOKIE_PATH: &str = "/auth";

/// Lifetime of a pending login attempt, in seconds.
pub const AUTH_REQUEST_TTL_SECS: i64 = 600;

/// Encodes the identity token into the session cookie.
#[derive(Debug, Clone)]
pub struct SessionCookieCodec {
    name: String,
    path: String,
    secure: bool,
}

impl SessionCookieCodec {
    pub fn new(name: impl Into<String>, path: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            secure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the session cookie for a verified token expiring at `expires_at`
    /// (Unix seconds). The cookie never outlives the token.
    pub fn encode(&self, tokens: &TokenSet, expires_at: i64) -> Cookie<'static> {
        let remaining = (expires_at - Utc::now().timestamp()).max(0);

        let mut cookie = self.base(tokens.identity_token.clone());
        cookie.set_max_age(Duration::seconds(remaining));
        if let Ok(at) = OffsetDateTime::from_unix_timestamp(expires_at) {
            cookie.set_expires(at);
        }
        cookie
    }

    /// Cookie value back to the raw token. Performs no verification.
    pub fn decode<'a>(&self, value: &'a str) -> &'a str {
        value
    }

    /// Empty, already-expired cookie with the same name, path and flags.
    pub fn clear(&self) -> Cookie<'static> {
        let mut cookie = self.base(String::new());
        cookie.set_max_age(Duration::ZERO);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        cookie
    }

    /// Raw token from the request's cookies, if the cookie is present and non-empty.
    pub fn read(&self, jar: &CookieJar) -> Option<String> {
        jar.get(&self.name)
            .map(|c| self.decode(c.value()))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn base(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path(self.path.clone())
            .build()
    }
}

/// In-flight login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Anti-forgery value echoed back by the provider
    pub state: String,
    /// Local path to land on after login
    pub return_to: String,
    /// Unix seconds
    pub issued_at: i64,
}

impl AuthorizationRequest {
    pub fn new(return_to: impl Into<String>) -> Self {
        Self {
            state: uuid::Uuid::new_v4().to_string(),
            return_to: return_to.into(),
            issued_at: Utc::now().timestamp(),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now - self.issued_at > AUTH_REQUEST_TTL_SECS || self.issued_at > now + 60
    }

    pub fn to_cookie(&self, secure: bool) -> Cookie<'static> {
        let value = serde_json::to_string(self).unwrap_or_default();
        Cookie::build((AUTH_REQUEST_COOKIE_NAME, value))
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .path(AUTH_REQUEST_COOKIE_PATH)
            .max_age(Duration::seconds(AUTH_REQUEST_TTL_SECS))
            .build()
    }

    /// Read the pending request. Tampered or undecryptable cookies are
    /// dropped by the jar and read as absent.
    pub fn from_jar(jar: &PrivateCookieJar) -> Option<Self> {
        let cookie = jar.get(AUTH_REQUEST_COOKIE_NAME)?;
        match serde_json::from_str(cookie.value()) {
            Ok(request) => Some(request),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable authorization request cookie");
                None
            }
        }
    }

    /// Cookie that removes the pending request from the browser.
    pub fn removal() -> Cookie<'static> {
        Cookie::build((AUTH_REQUEST_COOKIE_NAME, ""))
            .path(AUTH_REQUEST_COOKIE_PATH)
            .max_age(Duration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_set(identity_token: &str) -> TokenSet {
        TokenSet {
            identity_token: identity_token.to_string(),
            access_token: "opaque-access-token".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("Bearer".to_string()),
        }
    }

    #[test]
    fn encode_then_decode_yields_identity_token() {
        let codec = SessionCookieCodec::new("id_token", "/", true);
        let tokens = token_set("aaa.bbb.ccc");
        let cookie = codec.encode(&tokens, Utc::now().timestamp() + 3600);
        assert_eq!(codec.decode(cookie.value()), tokens.identity_token);
        assert_ne!(cookie.value(), tokens.access_token);
    }

    #[test]
    fn session_cookie_attributes() {
        let codec = SessionCookieCodec::new("id_token", "/app", false);
        let expires_at = Utc::now().timestamp() + 1800;
        let cookie = codec.encode(&token_set("aaa.bbb.ccc"), expires_at);

        assert_eq!(cookie.name(), "id_token");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/app"));

        let max_age = cookie.max_age().unwrap().whole_seconds();
        assert!(max_age <= 1800 && max_age >= 1795, "max_age = {max_age}");
        assert_eq!(
            cookie.expires_datetime().unwrap().unix_timestamp(),
            expires_at
        );
    }

    #[test]
    fn expired_token_gets_zero_max_age() {
        let codec = SessionCookieCodec::new("id_token", "/", true);
        let cookie = codec.encode(&token_set("a.b.c"), Utc::now().timestamp() - 60);
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }

    #[test]
    fn clear_is_empty_and_expired() {
        let codec = SessionCookieCodec::new("id_token", "/", true);
        let cleared = codec.clear();
        assert_eq!(cleared.name(), "id_token");
        assert_eq!(cleared.value(), "");
        assert_eq!(cleared.max_age(), Some(Duration::ZERO));
        assert_eq!(cleared.path(), Some("/"));
        assert_eq!(cleared.to_string(), codec.clear().to_string());
    }

    #[test]
    fn read_ignores_missing_and_empty_cookies() {
        let codec = SessionCookieCodec::new("id_token", "/", true);
        assert_eq!(codec.read(&CookieJar::new()), None);

        let jar = CookieJar::new().add(Cookie::new("id_token", ""));
        assert_eq!(codec.read(&jar), None);

        let jar = CookieJar::new().add(Cookie::new("id_token", "x.y.z"));
        assert_eq!(codec.read(&jar).as_deref(), Some("x.y.z"));
    }

    #[test]
    fn authorization_request_expiry() {
        let mut request = AuthorizationRequest::new("/reports");
        let now = request.issued_at;
        assert!(!request.is_expired(now));
        assert!(!request.is_expired(now + AUTH_REQUEST_TTL_SECS));
        assert!(request.is_expired(now + AUTH_REQUEST_TTL_SECS + 1));

        request.issued_at = now + 3600;
        assert!(request.is_expired(now));
    }

    #[test]
    fn authorization_request_states_are_unique() {
        let a = AuthorizationRequest::new("/");
        let b = AuthorizationRequest::new("/");
        assert_ne!(a.state, b.state);
    }

    #[test]
    fn authorization_request_cookie_is_scoped_to_auth_routes() {
        let cookie = AuthorizationRequest::new("/").to_cookie(true);
        assert_eq!(cookie.path(), Some("/auth"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(Duration::minutes(10)));
    }

    #[test]
    fn authorization_request_survives_the_private_jar() {
        let request = AuthorizationRequest::new("/reports");
        let key = axum_extra::extract::cookie::Key::generate();
        let jar = PrivateCookieJar::new(key).add(request.to_cookie(false));

        let restored = AuthorizationRequest::from_jar(&jar).unwrap();
        assert_eq!(restored.state, request.state);
        assert_eq!(restored.return_to, "/reports");
        assert_eq!(restored.issued_at, request.issued_at);
    }
}
