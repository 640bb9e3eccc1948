// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for auth unit tests: RSA keys, their key sets, and a token
//! minting helper.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use url::Url;

use super::exchange::HttpTokenExchanger;
use super::flow::AuthFlow;
use super::jwks::{KeySetCache, SigningKeySet};
use super::verifier::TokenVerifier;
use crate::config::AuthConfig;
use crate::state::AppState;

pub const ISSUER: &str = "https://idp.example.com";
pub const CLIENT_ID: &str = "client123";

pub const K1_PEM: &str = include_str!("../../tests/fixtures/k1.pem");
pub const K2_PEM: &str = include_str!("../../tests/fixtures/k2.pem");
pub const K1_JWKS: &str = include_str!("../../tests/fixtures/k1.jwks.json");
pub const K2_JWKS: &str = include_str!("../../tests/fixtures/k2.jwks.json");
pub const K1_K2_JWKS: &str = include_str!("../../tests/fixtures/k1_k2.jwks.json");

/// Standard identity token payload, `exp` relative to now.
pub fn id_token_claims(exp_offset_secs: i64) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "sub": "user_123",
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "exp": now + exp_offset_secs,
        "iat": now - 5,
        "email": "tenant@example.com",
        "email_verified": true,
        "cognito:groups": ["owners"],
        "token_use": "id"
    })
}

/// Sign `claims` with the given PEM key under key id `kid`.
pub fn mint(kid: &str, pem: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("fixture key parses");
    encode(&header, claims, &key).expect("token encodes")
}

/// Key set cache pre-loaded with `jwks`, pointed at a URL nothing listens on.
pub fn seeded_cache(jwks: &str) -> KeySetCache {
    let seed = SigningKeySet::from_json(jwks.as_bytes()).expect("fixture key set parses");
    KeySetCache::new("http://127.0.0.1:9/.well-known/jwks.json", reqwest::Client::new())
        .with_seed(seed)
}

pub fn seeded_verifier(jwks: &str) -> TokenVerifier {
    TokenVerifier::new(seeded_cache(jwks), ISSUER, CLIENT_ID)
}

pub fn test_config() -> AuthConfig {
    let redirect = Url::parse("https://app.example.com/auth/callback").expect("valid url");
    AuthConfig::new(ISSUER, CLIENT_ID, None, redirect).expect("valid config")
}

/// Flow over a key set seeded with `k1`. The token endpoint is unreachable.
pub fn test_flow() -> AuthFlow {
    let endpoint = Url::parse("http://127.0.0.1:9/oauth2/token").expect("valid url");
    let exchanger = HttpTokenExchanger::new(endpoint, CLIENT_ID, None, reqwest::Client::new());
    AuthFlow::new(
        Arc::new(test_config()),
        Arc::new(exchanger),
        seeded_verifier(K1_JWKS),
    )
}

pub fn test_state() -> AppState {
    AppState::new(test_flow())
}
