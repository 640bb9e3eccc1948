// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity token verification.
//!
//! ## Steps
//!
//! 1. Read `kid` and `alg` from the unverified header.
//! 2. Resolve the key through the [`KeySetCache`]; on a miss force a single
//!    refresh and retry once.
//! 3. Verify the signature with the algorithm the trusted key declares. A
//!    header `alg` that disagrees is rejected.
//! 4. Check `exp`, `iss`, `aud`/`client_id`, `iat` and `token_use`.
//!
//! Which check failed is logged, never returned to the client.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Validation};

use super::claims::{Claims, VerifiedClaims};
use super::error::AuthError;
use super::jwks::{KeySetCache, ResolvedKey};

/// Default clock skew tolerance (30 seconds).
pub const DEFAULT_CLOCK_SKEW_LEEWAY: u64 = 30;

/// Verifies identity tokens against the provider's key set.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: KeySetCache,
    issuer: String,
    client_id: String,
    leeway: u64,
}

impl TokenVerifier {
    pub fn new(keys: KeySetCache, issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            client_id: client_id.into(),
            leeway: DEFAULT_CLOCK_SKEW_LEEWAY,
        }
    }

    /// Override the clock skew allowance, in seconds.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway = leeway_secs;
        self
    }

    pub fn keys(&self) -> &KeySetCache {
        &self.keys
    }

    /// Verify a token and return its claims.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Token header could not be decoded");
            AuthError::MalformedToken
        })?;

        let kid = header.kid.as_deref().ok_or_else(|| {
            tracing::warn!("Token header has no kid");
            AuthError::MalformedToken
        })?;

        let key = self.resolve_key(kid).await?;

        if header.alg != key.algorithm {
            tracing::warn!(
                kid = %kid,
                header_alg = ?header.alg,
                key_alg = ?key.algorithm,
                "Token algorithm does not match signing key"
            );
            return Err(AuthError::BadSignature);
        }

        // Claims are checked below with exact semantics; the library only
        // verifies the signature and decodes the payload here.
        let mut validation = Validation::new(key.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(token, &key.key, &validation).map_err(|e| {
            let mapped = match e.kind() {
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    AuthError::MalformedToken
                }
                ErrorKind::Json(_) => AuthError::InvalidClaims("payload"),
                _ => AuthError::BadSignature,
            };
            tracing::warn!(kid = %kid, error = %e, "Token rejected during signature verification");
            mapped
        })?;

        let claims = token_data.claims;
        self.check_claims(&claims, Utc::now().timestamp())?;

        Ok(VerifiedClaims::new(claims))
    }

    /// Resolve `kid`, forcing at most one refresh on a miss.
    async fn resolve_key(&self, kid: &str) -> Result<std::sync::Arc<ResolvedKey>, AuthError> {
        if let Some(key) = self.keys.get_key(kid).await? {
            return Ok(key);
        }

        tracing::debug!(kid = %kid, "Key not found in cached key set");
        if !self.keys.force_refresh_for(kid).await? {
            return Err(AuthError::UnknownKey(kid.to_string()));
        }

        self.keys.cached_key(kid).await.ok_or_else(|| {
            tracing::warn!(kid = %kid, "Key id still unknown after refresh");
            AuthError::UnknownKey(kid.to_string())
        })
    }

    fn check_claims(&self, claims: &Claims, now: i64) -> Result<(), AuthError> {
        let leeway = self.leeway as i64;

        if claims.exp <= now - leeway {
            tracing::info!(sub = %claims.sub, exp = claims.exp, now, "Token expired");
            return Err(AuthError::ExpiredToken);
        }

        if claims.iss != self.issuer {
            tracing::warn!(iss = %claims.iss, expected = %self.issuer, "Token issuer mismatch");
            return Err(AuthError::InvalidClaims("iss"));
        }

        let audience_ok = claims
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(&self.client_id))
            || claims.client_id.as_deref() == Some(self.client_id.as_str());
        if !audience_ok {
            tracing::warn!(aud = ?claims.aud, client_id = ?claims.client_id, "Token audience mismatch");
            return Err(AuthError::InvalidClaims("aud"));
        }

        if let Some(iat) = claims.iat {
            if iat > now + leeway {
                tracing::warn!(iat, now, "Token issued in the future");
                return Err(AuthError::InvalidClaims("iat"));
            }
        }

        if let Some(token_use) = claims.token_use.as_deref() {
            if token_use != "id" {
                tracing::warn!(token_use = %token_use, "Token is not an identity token");
                return Err(AuthError::InvalidClaims("token_use"));
            }
        }

        Ok(())
    }
}
