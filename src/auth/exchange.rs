// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization code exchange against the provider's token endpoint.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use url::Url;

use super::error::AuthError;

/// Tokens returned by a successful code exchange.
#[derive(Clone, Deserialize)]
pub struct TokenSet {
    #[serde(rename = "id_token")]
    pub identity_token: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("identity_token", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenSet, AuthError>> + Send + 'a>>;

/// Trades an authorization code for tokens.
///
/// Implementations must not retry: a code is single-use at the provider.
pub trait TokenExchanger: Send + Sync {
    fn exchange<'a>(&'a self, code: &'a str, redirect_uri: &'a str) -> ExchangeFuture<'a>;
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
}

/// Token endpoint client speaking form-encoded OAuth2.
#[derive(Clone)]
pub struct HttpTokenExchanger {
    token_endpoint: Url,
    client_id: String,
    client_secret: Option<String>,
    http: reqwest::Client,
}

impl HttpTokenExchanger {
    /// `http` should carry the request timeout; exchanges are bounded by it.
    pub fn new(
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            token_endpoint,
            client_id: client_id.into(),
            client_secret,
            http,
        }
    }

    async fn post_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AuthError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(self.token_endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::ProviderUnreachable("token endpoint timed out".to_string())
                } else {
                    AuthError::ProviderUnreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %body,
                "Token endpoint rejected authorization code"
            );
            let reason = serde_json::from_str::<OAuthErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| "token_exchange_failed".to_string());
            return Err(AuthError::ExchangeFailed {
                status: status.as_u16(),
                reason,
            });
        }

        response.json::<TokenSet>().await.map_err(|e| {
            AuthError::ProviderUnreachable(format!("unreadable token response: {e}"))
        })
    }
}

impl TokenExchanger for HttpTokenExchanger {
    fn exchange<'a>(&'a self, code: &'a str, redirect_uri: &'a str) -> ExchangeFuture<'a> {
        Box::pin(self.post_code(code, redirect_uri))
    }
}
