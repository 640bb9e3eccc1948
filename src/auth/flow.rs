// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization Code flow controller.
//!
//! Per login attempt:
//!
//! ```text
//! ANONYMOUS -> REDIRECTED_TO_PROVIDER -> CALLBACK_RECEIVED -> AUTHENTICATED | FAILED
//! ```
//!
//! `AUTHENTICATED` falls back to `ANONYMOUS` on logout or when
//! [`AuthFlow::require_principal`] sees an expired token. There is no refresh
//! state; an expired session means a new login.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use serde::Deserialize;
use url::Url;
use utoipa::IntoParams;

use super::claims::Principal;
use super::cookies::{AuthorizationRequest, SessionCookieCodec};
use super::error::AuthError;
use super::exchange::TokenExchanger;
use super::verifier::TokenVerifier;
use crate::config::AuthConfig;

/// Route that starts a login.
pub const LOGIN_PATH: &str = "/auth/login";

/// Query string of the provider's redirect back to `/auth/callback`.
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where to send the browser to start a login, and what to remember meanwhile.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: Url,
    pub request: AuthorizationRequest,
}

/// A successful callback.
#[derive(Debug)]
pub struct EstablishedSession {
    pub cookie: Cookie<'static>,
    pub redirect_to: String,
    pub principal: Principal,
}

/// Result of a logout. Always succeeds.
#[derive(Debug, Clone)]
pub struct LogoutOutcome {
    pub cookie: Cookie<'static>,
    pub redirect_to: String,
}

/// Drives login, callback, session checks and logout.
#[derive(Clone)]
pub struct AuthFlow {
    config: Arc<AuthConfig>,
    exchanger: Arc<dyn TokenExchanger>,
    verifier: TokenVerifier,
    codec: SessionCookieCodec,
}

impl AuthFlow {
    pub fn new(
        config: Arc<AuthConfig>,
        exchanger: Arc<dyn TokenExchanger>,
        verifier: TokenVerifier,
    ) -> Self {
        let codec = SessionCookieCodec::new(
            config.cookie_name.clone(),
            config.cookie_path.clone(),
            config.cookie_secure,
        );
        Self {
            config,
            exchanger,
            verifier,
            codec,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Build the provider authorization URL for a new login attempt.
    ///
    /// `return_to` is honoured only if it is a local path.
    pub fn begin_login(&self, return_to: Option<&str>) -> LoginRedirect {
        let return_to = return_to
            .and_then(sanitize_return_to)
            .unwrap_or(self.config.login_redirect.as_str());
        let request = AuthorizationRequest::new(return_to);

        let mut url = self.config.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &self.config.scope_param())
            .append_pair("state", &request.state);

        tracing::debug!(return_to = %request.return_to, "Starting login");
        LoginRedirect { url, request }
    }

    /// Process the provider's redirect back to the application.
    ///
    /// `pending` is the login attempt remembered by [`Self::begin_login`]. No
    /// session is established unless the code exchange and token
    /// verification both succeed.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
        pending: Option<AuthorizationRequest>,
    ) -> Result<EstablishedSession, AuthError> {
        if let Some(error) = params.error {
            return Err(AuthError::ProviderDenied {
                error,
                description: params.error_description,
            });
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCode)?;

        let pending = pending.ok_or_else(|| {
            tracing::warn!("Callback without a pending login attempt");
            AuthError::StateMismatch
        })?;
        if params.state.as_deref() != Some(pending.state.as_str()) {
            tracing::warn!("Callback state does not match pending login attempt");
            return Err(AuthError::StateMismatch);
        }
        if pending.is_expired(Utc::now().timestamp()) {
            tracing::warn!(issued_at = pending.issued_at, "Pending login attempt expired");
            return Err(AuthError::StateMismatch);
        }

        let tokens = self
            .exchanger
            .exchange(&code, self.config.redirect_uri.as_str())
            .await?;

        let verified = self.verifier.verify(&tokens.identity_token).await?;
        let cookie = self.codec.encode(&tokens, verified.expires_at());
        let principal = Principal::from(verified);

        tracing::info!(sub = %principal.subject_id, "Login completed");

        Ok(EstablishedSession {
            cookie,
            redirect_to: pending.return_to,
            principal,
        })
    }

    /// Resolve the caller from the session cookie in `headers`.
    pub async fn require_principal(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let jar = CookieJar::from_headers(headers);
        let token = self.codec.read(&jar).ok_or(AuthError::NotAuthenticated)?;

        let verified = self.verifier.verify(&token).await.map_err(|e| {
            tracing::debug!(error = %e, "Session token rejected");
            e.into_session_error()
        })?;

        Ok(Principal::from(verified))
    }

    /// Clear the session. Idempotent.
    pub fn logout(&self) -> LogoutOutcome {
        let redirect_to = match &self.config.logout_endpoint {
            Some(endpoint) => {
                let mut url = endpoint.clone();
                url.query_pairs_mut()
                    .append_pair("client_id", &self.config.client_id)
                    .append_pair("logout_uri", &self.config.app_root_url());
                url.to_string()
            }
            None => "/".to_string(),
        };

        LogoutOutcome {
            cookie: self.codec.clear(),
            redirect_to,
        }
    }

    /// Login page URL for a failed login. Carries only a generic error code.
    pub fn failure_redirect(&self, error: &AuthError) -> String {
        let code = match error {
            AuthError::ProviderDenied { .. } => "access_denied",
            _ => "authentication_failed",
        };
        format!("{}?error={code}", self.config.login_page)
    }
}

/// Login route that brings the browser back to `return_to` afterwards.
///
/// Non-local targets are dropped so the login falls back to the default
/// landing page.
pub fn login_path(return_to: &str) -> String {
    match sanitize_return_to(return_to) {
        Some(target) => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("return_to", target)
                .finish();
            format!("{LOGIN_PATH}?{query}")
        }
        None => LOGIN_PATH.to_string(),
    }
}

/// Accept only local absolute paths as post-login targets.
fn sanitize_return_to(target: &str) -> Option<&str> {
    let local = target.starts_with('/')
        && !target.starts_with("//")
        && !target.starts_with("/\\")
        && !target.chars().any(char::is_control);
    local.then_some(target)
}
