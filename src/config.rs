// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup into an
//! immutable [`AuthConfig`] (plus a small [`ServerConfig`]) and passed down
//! explicitly. Nothing below the binary reads the environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OIDC_ISSUER_URL` | Expected `iss` claim, compared exactly | Required |
//! | `OIDC_CLIENT_ID` | Client id, expected audience | Required |
//! | `OIDC_CLIENT_SECRET` | Confidential client secret | Optional |
//! | `OIDC_REDIRECT_URI` | Registered callback URL | Required |
//! | `OIDC_SCOPES` | Space-separated scopes | `openid email profile` |
//! | `OIDC_AUTHORIZATION_ENDPOINT` | Authorization URL | `{issuer}/oauth2/authorize` |
//! | `OIDC_TOKEN_ENDPOINT` | Token URL | `{issuer}/oauth2/token` |
//! | `OIDC_JWKS_URI` | Key set document URL | `{issuer}/.well-known/jwks.json` |
//! | `OIDC_LOGOUT_ENDPOINT` | Provider logout page | Unset (local logout only) |
//! | `COOKIE_SECURE` | `Secure` cookie flag | `true` |
//! | `COOKIE_NAME` | Session cookie name | `id_token` |
//! | `COOKIE_PATH` | Session cookie path | `/` |
//! | `COOKIE_KEY` | Key for the login-state cookie (at least 64 bytes) | Random per process |
//! | `LOGIN_REDIRECT` | Landing path after login | `/` |
//! | `LOGIN_PAGE` | Where failed logins are sent | `/login` |
//! | `JWKS_CACHE_TTL_SECS` | Key set refresh interval | `3600` |
//! | `HTTP_TIMEOUT_SECS` | Timeout for provider calls | `5` |
//! | `CLOCK_SKEW_SECS` | Allowance when checking `exp` / `iat` | `30` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env::VarError;
use std::net::SocketAddr;
use std::time::Duration;

use axum_extra::extract::cookie::Key;
use url::Url;

use crate::auth::cookies::DEFAULT_SESSION_COOKIE_NAME;
use crate::auth::jwks::DEFAULT_CACHE_TTL;
use crate::auth::verifier::DEFAULT_CLOCK_SKEW_LEEWAY;

pub const DEFAULT_SCOPES: &str = "openid email profile";

/// Default timeout for token exchange and key set fetches.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Relying-party configuration. Built once, never mutated.
#[derive(Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
    pub logout_endpoint: Option<Url>,
    pub cookie_secure: bool,
    pub cookie_name: String,
    pub cookie_path: String,
    pub cookie_key: Key,
    pub login_redirect: String,
    pub login_page: String,
    pub jwks_cache_ttl: Duration,
    pub http_timeout: Duration,
    pub clock_skew_secs: u64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("scopes", &self.scopes)
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("jwks_uri", &self.jwks_uri.as_str())
            .field("logout_endpoint", &self.logout_endpoint.as_ref().map(Url::as_str))
            .field("cookie_secure", &self.cookie_secure)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_path", &self.cookie_path)
            .field("login_redirect", &self.login_redirect)
            .field("login_page", &self.login_page)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .field("http_timeout", &self.http_timeout)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Configuration with provider endpoints derived from the issuer and all
    /// other settings at their defaults.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        redirect_uri: Url,
    ) -> Result<Self, ConfigError> {
        let issuer = issuer.into();
        let base = issuer.trim_end_matches('/');

        Ok(Self {
            authorization_endpoint: parse_url(
                "OIDC_AUTHORIZATION_ENDPOINT",
                &format!("{base}/oauth2/authorize"),
            )?,
            token_endpoint: parse_url("OIDC_TOKEN_ENDPOINT", &format!("{base}/oauth2/token"))?,
            jwks_uri: parse_url("OIDC_JWKS_URI", &format!("{base}/.well-known/jwks.json"))?,
            issuer,
            client_id: client_id.into(),
            client_secret,
            redirect_uri,
            scopes: split_scopes(DEFAULT_SCOPES),
            logout_endpoint: None,
            cookie_secure: true,
            cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            cookie_path: "/".to_string(),
            cookie_key: Key::generate(),
            login_redirect: "/".to_string(),
            login_page: "/login".to_string(),
            jwks_cache_ttl: DEFAULT_CACHE_TTL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_LEEWAY,
        })
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let required = |key: &str| {
            reader(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
        };
        let optional = |key: &str| reader(key).ok().filter(|v| !v.trim().is_empty());

        let issuer = required("OIDC_ISSUER_URL")?;
        parse_url("OIDC_ISSUER_URL", &issuer)?;
        let client_id = required("OIDC_CLIENT_ID")?;
        let redirect_uri = parse_url("OIDC_REDIRECT_URI", &required("OIDC_REDIRECT_URI")?)?;
        let client_secret = optional("OIDC_CLIENT_SECRET");

        let mut config = Self::new(issuer, client_id, client_secret, redirect_uri)?;

        if let Some(scopes) = optional("OIDC_SCOPES") {
            config.scopes = split_scopes(&scopes);
        }
        if let Some(v) = optional("OIDC_AUTHORIZATION_ENDPOINT") {
            config.authorization_endpoint = parse_url("OIDC_AUTHORIZATION_ENDPOINT", &v)?;
        }
        if let Some(v) = optional("OIDC_TOKEN_ENDPOINT") {
            config.token_endpoint = parse_url("OIDC_TOKEN_ENDPOINT", &v)?;
        }
        if let Some(v) = optional("OIDC_JWKS_URI") {
            config.jwks_uri = parse_url("OIDC_JWKS_URI", &v)?;
        }
        if let Some(v) = optional("OIDC_LOGOUT_ENDPOINT") {
            config.logout_endpoint = Some(parse_url("OIDC_LOGOUT_ENDPOINT", &v)?);
        }
        if let Some(v) = optional("COOKIE_SECURE") {
            config.cookie_secure = parse_bool("COOKIE_SECURE", &v)?;
        }
        if let Some(v) = optional("COOKIE_NAME") {
            config.cookie_name = v;
        }
        if let Some(v) = optional("COOKIE_PATH") {
            config.cookie_path = v;
        }
        if let Some(v) = optional("COOKIE_KEY") {
            config.cookie_key = Key::try_from(v.as_bytes()).map_err(|_| {
                ConfigError::InvalidValue("COOKIE_KEY".into(), "must be at least 64 bytes".into())
            })?;
        }
        if let Some(v) = optional("LOGIN_REDIRECT") {
            config.login_redirect = local_path("LOGIN_REDIRECT", v)?;
        }
        if let Some(v) = optional("LOGIN_PAGE") {
            config.login_page = local_path("LOGIN_PAGE", v)?;
        }
        if let Some(v) = optional("JWKS_CACHE_TTL_SECS") {
            config.jwks_cache_ttl = Duration::from_secs(parse_u64("JWKS_CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = optional("HTTP_TIMEOUT_SECS") {
            let secs = parse_u64("HTTP_TIMEOUT_SECS", &v)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue(
                    "HTTP_TIMEOUT_SECS".into(),
                    "must be greater than zero".into(),
                ));
            }
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = optional("CLOCK_SKEW_SECS") {
            config.clock_skew_secs = parse_u64("CLOCK_SKEW_SECS", &v)?;
        }

        Ok(config)
    }

    pub fn with_token_endpoint(mut self, url: Url) -> Self {
        self.token_endpoint = url;
        self
    }

    pub fn with_jwks_uri(mut self, url: Url) -> Self {
        self.jwks_uri = url;
        self
    }

    pub fn with_logout_endpoint(mut self, url: Url) -> Self {
        self.logout_endpoint = Some(url);
        self
    }

    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    /// Space-joined scope list, as sent to the authorization endpoint.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Absolute URL of the application root, derived from the callback URL.
    pub fn app_root_url(&self) -> String {
        format!("{}/", self.redirect_uri.origin().ascii_serialization())
    }
}

/// Bind address and log format.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let host = reader("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = reader("PORT").unwrap_or_else(|_| "8080".to_string());
        let bind_addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("HOST/PORT".into(), e.to_string()))?;

        let json_logs = reader("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            json_logs,
        })
    }
}

/// Accepts `true/1/yes/on` and `false/0/no/off`, case-insensitively.
pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("expected a boolean, got `{other}`"),
        )),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn local_path(key: &str, value: String) -> Result<String, ConfigError> {
    if value.starts_with('/') && !value.starts_with("//") {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be a local path starting with `/`".into(),
        ))
    }
}

fn split_scopes(scopes: &str) -> Vec<String> {
    scopes.split_whitespace().map(str::to_string).collect()
}
