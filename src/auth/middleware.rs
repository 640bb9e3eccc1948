// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session middleware for Axum.
//!
//! Protects an entire router subtree:
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/reports", get(list_reports))
//!     .route_layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         require_session,
//!     ));
//! ```
//!
//! The resolved [`Principal`] is inserted into request extensions, where the
//! `Auth` extractor picks it up without verifying the token a second time.
//!
//! [`require_session`] answers API callers with 401. Browser pages use
//! [`require_session_or_login`], which sends the visitor through the login
//! and back to the page they asked for.

use axum::{
    extract::{Request, State},
    http::{header::LOCATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::flow::login_path;
use super::Principal;
use crate::state::AppState;

/// Reject requests without a valid session with 401.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.auth.require_principal(request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert::<Principal>(principal);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Redirect requests without a valid session to the login route.
pub async fn require_session_or_login(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.auth.require_principal(request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert::<Principal>(principal);
            next.run(request).await
        }
        Err(e) => {
            let target = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            tracing::debug!(error_code = e.error_code(), target = %target, "Redirecting to login");
            (StatusCode::FOUND, [(LOCATION, login_path(target))]).into_response()
        }
    }
}
