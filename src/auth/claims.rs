// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity token claims and the authenticated principal.
//!
//! A [`Principal`] can only be built from [`VerifiedClaims`], and
//! `VerifiedClaims` can only be produced by the token verifier.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// `aud` is either a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == client_id,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Claims carried by an identity token.
///
/// Standard OIDC claims plus the group and username claims Cognito-style
/// providers emit under a namespaced key. A token may carry both the
/// namespaced and the plain form; the namespaced one wins. Anything else
/// lands in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (stable user id at the provider)
    pub sub: String,

    /// Issuer URL
    pub iss: String,

    /// Audience. Identity tokens carry the client id here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Access-token style audience, accepted as an alternative to `aud`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Expiration (Unix seconds)
    pub exp: i64,

    /// Issued at (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(
        default,
        rename = "cognito:username",
        skip_serializing_if = "Option::is_none"
    )]
    pub cognito_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,

    #[serde(
        default,
        rename = "cognito:groups",
        skip_serializing_if = "Option::is_none"
    )]
    pub cognito_groups: Option<Vec<String>>,

    /// `id` or `access` on providers that mark token purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Claims whose token passed signature and claim validation.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims(Claims);

impl VerifiedClaims {
    pub(super) fn new(claims: Claims) -> Self {
        Self(claims)
    }

    pub fn claims(&self) -> &Claims {
        &self.0
    }

    pub fn expires_at(&self) -> i64 {
        self.0.exp
    }

    pub fn into_claims(self) -> Claims {
        self.0
    }
}

/// The authenticated caller, rebuilt from the session cookie on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    /// Provider subject id
    pub subject_id: String,

    pub email: Option<String>,

    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Group / role memberships
    pub groups: Vec<String>,

    pub email_verified: bool,

    /// Token expiration (Unix timestamp, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl Principal {
    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

impl From<VerifiedClaims> for Principal {
    fn from(verified: VerifiedClaims) -> Self {
        let claims = verified.into_claims();

        let name = claims.name.or_else(|| {
            match (claims.given_name.as_deref(), claims.family_name.as_deref()) {
                (Some(given), Some(family)) => Some(format!("{given} {family}")),
                (Some(given), None) => Some(given.to_string()),
                (None, Some(family)) => Some(family.to_string()),
                (None, None) => None,
            }
        });

        Self {
            subject_id: claims.sub,
            email: claims.email,
            name,
            username: claims
                .cognito_username
                .or(claims.username)
                .or(claims.preferred_username),
            groups: claims
                .cognito_groups
                .or(claims.groups)
                .unwrap_or_default(),
            email_verified: claims.email_verified.unwrap_or(false),
            expires_at: claims.exp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims() -> Claims {
        serde_json::from_value(serde_json::json!({
            "sub": "user_123",
            "iss": "https://idp.example.com",
            "aud": "client123",
            "exp": 1700003600,
            "iat": 1700000000,
            "email": "tenant@example.com",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "cognito:username": "ada",
            "cognito:groups": ["admin", "owners"],
            "token_use": "id",
            "auth_time": 1700000000
        }))
        .unwrap()
    }

    #[test]
    fn namespaced_claims_are_recognised() {
        let claims = sample_claims();
        assert_eq!(claims.cognito_username.as_deref(), Some("ada"));
        assert_eq!(
            claims.cognito_groups.as_deref(),
            Some(&["admin".to_string(), "owners".to_string()][..])
        );
        assert_eq!(claims.extra.get("auth_time"), Some(&Value::from(1700000000)));
    }

    #[test]
    fn namespaced_and_plain_claims_may_coexist() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "user_123",
            "iss": "https://idp.example.com",
            "aud": "client123",
            "exp": 1700003600,
            "cognito:username": "ada",
            "preferred_username": "ada_l",
            "cognito:groups": ["admin"],
            "groups": ["everyone"]
        }))
        .unwrap();

        let principal = Principal::from(VerifiedClaims::new(claims));
        assert_eq!(principal.username.as_deref(), Some("ada"));
        assert_eq!(principal.groups, vec!["admin"]);
    }

    #[test]
    fn plain_username_claims_are_fallbacks() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "user_123",
            "iss": "https://idp.example.com",
            "exp": 1700003600,
            "preferred_username": "ada_l",
            "groups": ["everyone"]
        }))
        .unwrap();

        let principal = Principal::from(VerifiedClaims::new(claims));
        assert_eq!(principal.username.as_deref(), Some("ada_l"));
        assert_eq!(principal.groups, vec!["everyone"]);
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let single: Audience = serde_json::from_str(r#""client123""#).unwrap();
        let many: Audience = serde_json::from_str(r#"["other","client123"]"#).unwrap();
        assert!(single.contains("client123"));
        assert!(many.contains("client123"));
        assert!(!many.contains("client999"));
    }

    #[test]
    fn principal_from_verified_claims() {
        let principal = Principal::from(VerifiedClaims::new(sample_claims()));
        assert_eq!(principal.subject_id, "user_123");
        assert_eq!(principal.email.as_deref(), Some("tenant@example.com"));
        assert_eq!(principal.name.as_deref(), Some("Ada Lovelace"));
        assert!(principal.is_member_of("admin"));
        assert!(!principal.email_verified);
        assert_eq!(principal.expires_at, 1700003600);
    }

    #[test]
    fn principal_serializes_without_expiry() {
        let principal = Principal::from(VerifiedClaims::new(sample_claims()));
        let json = serde_json::to_value(&principal).unwrap();
        assert_eq!(json["subject_id"], "user_123");
        assert_eq!(json["groups"], serde_json::json!(["admin", "owners"]));
        assert!(json.get("expires_at").is_none());
    }
}
