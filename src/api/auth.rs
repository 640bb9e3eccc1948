// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Browser-facing login, callback, current-user and logout routes.
//!
//! Every redirect is a plain `302 Found`.

use axum::{
    extract::{Query, State},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::{Auth, AuthError, AuthorizationRequest, CallbackParams, Principal};
use crate::state::AppState;

/// `302 Found` to the given location.
#[derive(Debug)]
pub struct Found(pub String);

impl IntoResponse for Found {
    fn into_response(self) -> Response {
        (StatusCode::FOUND, [(LOCATION, self.0)]).into_response()
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// Local path to return to after login
    pub return_to: Option<String>,
}

/// Start a login: redirect to the identity provider.
#[utoipa::path(
    get,
    path = "/auth/login",
    tag = "Auth",
    params(LoginQuery),
    responses(
        (status = 302, description = "Redirect to the provider's authorization endpoint")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(query): Query<LoginQuery>,
) -> (PrivateCookieJar, Found) {
    let login = state.auth.begin_login(query.return_to.as_deref());
    let jar = jar.add(login.request.to_cookie(state.auth.config().cookie_secure));
    (jar, Found(login.url.into()))
}

/// Provider redirect target. Sets the session cookie on success.
#[utoipa::path(
    get,
    path = "/auth/callback",
    tag = "Auth",
    params(CallbackParams),
    responses(
        (status = 302, description = "Session established, or redirect to the login page on failure")
    )
)]
pub async fn callback(
    State(state): State<AppState>,
    pending: PrivateCookieJar,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Found) {
    let request = AuthorizationRequest::from_jar(&pending);
    let jar = jar.add(AuthorizationRequest::removal());

    match state.auth.handle_callback(params, request).await {
        Ok(session) => (jar.add(session.cookie), Found(session.redirect_to)),
        Err(e) => {
            log_login_failure(&e);
            (jar, Found(state.auth.failure_redirect(&e)))
        }
    }
}

fn log_login_failure(e: &AuthError) {
    if e.status_code().is_server_error() {
        tracing::error!(error = %e, error_code = e.error_code(), "Login failed");
    } else {
        tracing::warn!(error = %e, error_code = e.error_code(), "Login failed");
    }
}

/// Current session's principal.
#[utoipa::path(
    get,
    path = "/auth/user",
    tag = "Auth",
    responses(
        (status = 200, description = "Authenticated user", body = Principal),
        (status = 401, description = "No valid session")
    )
)]
pub async fn current_user(Auth(principal): Auth) -> Json<Principal> {
    Json(principal)
}

/// Clear the session cookie. Always succeeds.
#[utoipa::path(
    get,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 302, description = "Session cleared")
    )
)]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Found) {
    let outcome = state.auth.logout();
    (jar.add(outcome.cookie), Found(outcome.redirect_to))
}
