// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Browser-facing OAuth2 Authorization Code flow with provider-signed
//! identity tokens used as the session.
//!
//! ## Auth Flow
//!
//! 1. `GET /auth/login` redirects to the provider's authorization endpoint
//!    with a fresh anti-forgery `state`
//! 2. The provider redirects back to `GET /auth/callback?code=..&state=..`
//! 3. The server:
//!    - Exchanges the code at the token endpoint
//!    - Verifies the identity token signature against the provider key set
//!    - Checks `exp`, `iss`, `aud`
//!    - Stores the raw identity token in an HttpOnly session cookie
//! 4. Every protected request re-verifies the cookie's token locally
//!
//! ## Security
//!
//! - A [`Principal`] can only be built from verified claims
//! - Keys come only from the provider's key set document, never the request
//! - Unknown key ids force at most one key set refresh each
//! - Sessions are stateless; logout clears the cookie

pub mod claims;
pub mod cookies;
pub mod error;
pub mod exchange;
pub mod extractor;
pub mod flow;
pub mod jwks;
pub mod middleware;
pub mod refresher;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use claims::{Claims, Principal, VerifiedClaims};
pub use cookies::{AuthorizationRequest, SessionCookieCodec};
pub use error::AuthError;
pub use exchange::{HttpTokenExchanger, TokenExchanger, TokenSet};
pub use extractor::{Auth, OptionalAuth};
pub use flow::{AuthFlow, CallbackParams};
pub use jwks::{KeySetCache, SigningKeySet};
pub use refresher::KeySetRefresher;
pub use verifier::TokenVerifier;
