// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::auth::{AuthFlow, HttpTokenExchanger, KeySetCache, TokenVerifier};
use crate::config::AuthConfig;

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthFlow,
}

impl AppState {
    pub fn new(auth: AuthFlow) -> Self {
        Self { auth }
    }

    /// Wire the production components from configuration.
    ///
    /// One HTTP client, carrying the configured timeout, is shared by the
    /// token exchanger and the key set cache.
    pub fn from_config(config: AuthConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        let keys = KeySetCache::new(config.jwks_uri.as_str(), http.clone())
            .with_ttl(config.jwks_cache_ttl);
        let verifier = TokenVerifier::new(keys, config.issuer.clone(), config.client_id.clone())
            .with_leeway(config.clock_skew_secs);
        let exchanger = HttpTokenExchanger::new(
            config.token_endpoint.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            http,
        );

        Ok(Self::new(AuthFlow::new(
            Arc::new(config),
            Arc::new(exchanger),
            verifier,
        )))
    }

    pub fn key_set(&self) -> &KeySetCache {
        self.auth.verifier().keys()
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.auth.config().cookie_key.clone()
    }
}
