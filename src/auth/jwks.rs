// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Update discipline
//!
//! - A refresh builds a complete [`SigningKeySet`] in a local value and then
//!   swaps the shared `Arc` under a short write lock. Readers never observe a
//!   partially populated map.
//! - A failed refresh leaves the previous set in place.
//! - Refreshes are serialized by an async mutex so concurrent callers do not
//!   all hit the provider.
//! - A stale set is refreshed by at most one request at a time; every other
//!   request keeps verifying against the stale keys without waiting. After a
//!   failed fetch, lazy refreshes back off for [`FAILED_REFRESH_BACKOFF`].
//! - A cache miss may force at most one refresh per unknown key id, and at
//!   most one forced refresh per [`FORCED_REFRESH_FLOOR`] overall. Those key
//!   ids are remembered in a bounded LRU; both limits reset on the next
//!   scheduled refresh.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{
    AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm, PublicKeyUse,
};
use jsonwebtoken::{Algorithm, DecodingKey};
use lru::LruCache;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use super::error::AuthError;

/// Default key set refresh interval (1 hour).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// How many distinct unknown key ids are remembered.
const FORCED_REFRESH_MEMORY: usize = 256;

/// Minimum time between two forced refreshes, whatever the key id.
pub const FORCED_REFRESH_FLOOR: Duration = Duration::from_secs(30);

/// How long lazy refreshes are suspended after a failed fetch.
pub const FAILED_REFRESH_BACKOFF: Duration = Duration::from_secs(30);

/// A trusted verification key.
#[derive(Clone)]
pub struct ResolvedKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub key: DecodingKey,
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Key id -> public key, with the time it was fetched.
///
/// Never mutated after construction; replaced wholesale on refresh.
pub struct SigningKeySet {
    keys: HashMap<String, Arc<ResolvedKey>>,
    fetched_at: Instant,
}

/// Raw document shape; keys are parsed one by one so a single unsupported
/// entry does not poison the whole set.
#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

impl SigningKeySet {
    /// Parse a provider key set document.
    ///
    /// Unsupported or malformed keys are skipped. A document without a single
    /// usable signing key is an error.
    pub fn from_json(body: &[u8]) -> Result<Self, AuthError> {
        let raw: RawKeySet = serde_json::from_slice(body)
            .map_err(|e| AuthError::KeySetFetch(format!("invalid key set document: {e}")))?;

        let mut keys = HashMap::with_capacity(raw.keys.len());
        for value in raw.keys {
            let jwk: Jwk = match serde_json::from_value(value) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unparseable key in key set");
                    continue;
                }
            };
            match jwk_to_resolved_key(&jwk) {
                Ok(resolved) => {
                    keys.insert(resolved.kid.clone(), Arc::new(resolved));
                }
                Err(reason) => {
                    tracing::warn!(
                        kid = jwk.common.key_id.as_deref().unwrap_or("<none>"),
                        reason,
                        "Skipping unusable key in key set"
                    );
                }
            }
        }

        if keys.is_empty() {
            return Err(AuthError::KeySetFetch(
                "key set contains no usable signing keys".to_string(),
            ));
        }

        Ok(Self {
            keys,
            fetched_at: Instant::now(),
        })
    }

    pub fn get(&self, kid: &str) -> Option<Arc<ResolvedKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sorted key ids.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Budget for refreshes triggered by unknown key ids.
struct ForcedRefreshes {
    kids: LruCache<String, ()>,
    last: Option<Instant>,
}

impl ForcedRefreshes {
    fn new() -> Self {
        let capacity = NonZeroUsize::new(FORCED_REFRESH_MEMORY).unwrap_or(NonZeroUsize::MIN);
        Self {
            kids: LruCache::new(capacity),
            last: None,
        }
    }

    /// Record a forced refresh for `kid` if the budget allows one.
    fn try_acquire(&mut self, kid: &str) -> bool {
        if self.kids.contains(kid) {
            tracing::debug!(kid = %kid, "Unknown key id already forced a refresh, skipping");
            return false;
        }
        if self.last.is_some_and(|at| at.elapsed() < FORCED_REFRESH_FLOOR) {
            tracing::debug!(kid = %kid, "Forced refresh budget spent, skipping");
            return false;
        }
        self.kids.put(kid.to_string(), ());
        self.last = Some(Instant::now());
        true
    }

    fn reset(&mut self) {
        self.kids.clear();
        self.last = None;
    }
}

/// Cache of the identity provider's signing keys.
#[derive(Clone)]
pub struct KeySetCache {
    /// Key set document URL
    jwks_uri: String,
    /// Refresh interval
    ttl: Duration,
    /// Current snapshot; `None` until the first successful fetch
    current: Arc<RwLock<Option<Arc<SigningKeySet>>>>,
    /// Serializes refreshes
    refresh_lock: Arc<Mutex<()>>,
    /// Forced refresh budget
    forced: Arc<Mutex<ForcedRefreshes>>,
    /// When the last fetch failed; cleared by a successful fetch
    last_failure: Arc<Mutex<Option<Instant>>>,
    /// Number of fetches attempted
    fetches: Arc<AtomicU64>,
    /// HTTP client (carries the request timeout)
    client: reqwest::Client,
}

impl KeySetCache {
    /// Create a key set cache.
    ///
    /// # Arguments
    /// - `jwks_uri`: The key set URL (e.g., `https://idp.example.com/.well-known/jwks.json`)
    /// - `client`: HTTP client; its timeout bounds every fetch
    pub fn new(jwks_uri: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            ttl: DEFAULT_CACHE_TTL,
            current: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            forced: Arc::new(Mutex::new(ForcedRefreshes::new())),
            last_failure: Arc::new(Mutex::new(None)),
            fetches: Arc::new(AtomicU64::new(0)),
            client,
        }
    }

    /// Create with custom refresh interval.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Start with an already known key set.
    pub fn with_seed(mut self, keys: SigningKeySet) -> Self {
        self.current = Arc::new(RwLock::new(Some(Arc::new(keys))));
        self
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of key set fetches attempted so far.
    pub fn refresh_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Current snapshot, if any keys have ever been loaded.
    pub async fn snapshot(&self) -> Option<Arc<SigningKeySet>> {
        self.current.read().await.clone()
    }

    /// Check if a non-stale key set is cached.
    pub async fn is_cached(&self) -> bool {
        self.snapshot()
            .await
            .is_some_and(|set| !set.is_stale(self.ttl))
    }

    /// Key ids of the current snapshot.
    pub async fn key_ids(&self) -> Vec<String> {
        self.snapshot()
            .await
            .map(|set| set.key_ids())
            .unwrap_or_default()
    }

    /// Look up a key in the current snapshot without touching the network.
    pub async fn cached_key(&self, kid: &str) -> Option<Arc<ResolvedKey>> {
        self.snapshot().await.and_then(|set| set.get(kid))
    }

    /// Resolve a key id.
    ///
    /// Loads the key set if nothing is cached yet. Once the refresh interval
    /// has elapsed, one caller refreshes while the others keep using the stale
    /// keys; a failed refresh also keeps serving them.
    pub async fn get_key(&self, kid: &str) -> Result<Option<Arc<ResolvedKey>>, AuthError> {
        match self.snapshot().await {
            Some(set) if !set.is_stale(self.ttl) => Ok(set.get(kid)),
            Some(stale) => {
                let Ok(_guard) = self.refresh_lock.try_lock() else {
                    return Ok(stale.get(kid));
                };
                if self.is_cached().await {
                    return Ok(self.cached_key(kid).await);
                }
                if self.recently_failed().await {
                    return Ok(stale.get(kid));
                }
                if let Err(e) = self.scheduled_fetch().await {
                    tracing::warn!(error = %e, "Key set refresh failed, serving cached keys");
                    return Ok(stale.get(kid));
                }
                Ok(self.cached_key(kid).await)
            }
            None => {
                let _guard = self.refresh_lock.lock().await;
                if self.snapshot().await.is_none() {
                    if self.recently_failed().await {
                        return Err(AuthError::KeySetFetch(
                            "key set fetch failed recently, backing off".to_string(),
                        ));
                    }
                    self.scheduled_fetch().await?;
                }
                Ok(self.cached_key(kid).await)
            }
        }
    }

    /// Force refresh the key set (scheduled or explicit refresh).
    ///
    /// Also resets the forced refresh budget.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.scheduled_fetch().await
    }

    /// Refresh on behalf of a key id missing from the cache.
    ///
    /// Returns `Ok(false)` without any network I/O if this key id already
    /// triggered a forced refresh since the last scheduled one, or if another
    /// key id forced one less than [`FORCED_REFRESH_FLOOR`] ago.
    pub async fn force_refresh_for(&self, kid: &str) -> Result<bool, AuthError> {
        if !self.forced.lock().await.try_acquire(kid) {
            return Ok(false);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another request may have refreshed while we waited.
        if self.cached_key(kid).await.is_some() {
            return Ok(true);
        }

        tracing::info!(kid = %kid, "Unknown key id, refreshing key set");
        self.fetch_and_swap().await?;
        Ok(true)
    }

    /// Fetch on the regular schedule. Caller holds `refresh_lock`.
    async fn scheduled_fetch(&self) -> Result<(), AuthError> {
        self.fetch_and_swap().await?;
        self.forced.lock().await.reset();
        Ok(())
    }

    async fn recently_failed(&self) -> bool {
        self.last_failure
            .lock()
            .await
            .is_some_and(|at| at.elapsed() < FAILED_REFRESH_BACKOFF)
    }

    /// Build the new set locally, then swap it in. Caller holds `refresh_lock`.
    async fn fetch_and_swap(&self) -> Result<(), AuthError> {
        let fresh = match self.fetch().await {
            Ok(fresh) => fresh,
            Err(e) => {
                *self.last_failure.lock().await = Some(Instant::now());
                return Err(e);
            }
        };
        tracing::info!(keys = fresh.len(), "Signing key set refreshed");
        *self.last_failure.lock().await = None;
        *self.current.write().await = Some(Arc::new(fresh));
        Ok(())
    }

    /// Fetch the key set document from the provider.
    async fn fetch(&self) -> Result<SigningKeySet, AuthError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let response = self
            .client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::KeySetFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeySetFetch(format!(
                "HTTP {} from key set endpoint",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::KeySetFetch(e.to_string()))?;

        SigningKeySet::from_json(&body)
    }
}

/// Convert a JWK to a trusted key, or explain why it is unusable.
fn jwk_to_resolved_key(jwk: &Jwk) -> Result<ResolvedKey, &'static str> {
    let kid = jwk.common.key_id.clone().ok_or("missing kid")?;

    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return Err("encryption key");
    }

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let algorithm = match jwk.common.key_algorithm {
                None | Some(KeyAlgorithm::RS256) => Algorithm::RS256,
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                Some(KeyAlgorithm::PS256) => Algorithm::PS256,
                Some(KeyAlgorithm::PS384) => Algorithm::PS384,
                Some(KeyAlgorithm::PS512) => Algorithm::PS512,
                Some(_) => return Err("algorithm does not match RSA key"),
            };
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|_| "invalid RSA components")?;
            Ok(ResolvedKey {
                kid,
                algorithm,
                key,
            })
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let algorithm = match (&ec.curve, jwk.common.key_algorithm) {
                (EllipticCurve::P256, None | Some(KeyAlgorithm::ES256)) => Algorithm::ES256,
                (EllipticCurve::P384, None | Some(KeyAlgorithm::ES384)) => Algorithm::ES384,
                _ => return Err("unsupported curve or algorithm"),
            };
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|_| "invalid EC components")?;
            Ok(ResolvedKey {
                kid,
                algorithm,
                key,
            })
        }
        _ => Err("unsupported key type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{K1_JWKS, K1_K2_JWKS, K2_JWKS};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve_jwks(server: &MockServer, body: &'static str, expected: u64) {
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .expect(expected)
            .mount(server)
            .await;
    }

    fn cache_for(server: &MockServer) -> KeySetCache {
        KeySetCache::new(
            format!("{}/.well-known/jwks.json", server.uri()),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn parses_rsa_keys_with_ids() {
        let set = SigningKeySet::from_json(K1_K2_JWKS.as_bytes()).unwrap();
        assert_eq!(set.key_ids(), vec!["k1", "k2"]);
        assert_eq!(set.get("k1").unwrap().algorithm, Algorithm::RS256);
    }

    #[test]
    fn skips_unusable_keys_but_keeps_the_rest() {
        let doc = serde_json::json!({
            "keys": [
                { "kty": "RSA", "kid": "enc", "use": "enc", "n": "AQAB", "e": "AQAB" },
                { "kty": "oct", "kid": "sym", "k": "c2VjcmV0" },
                { "kty": "RSA", "n": "AQAB", "e": "AQAB" },
                { "nonsense": true },
                serde_json::from_str::<serde_json::Value>(K1_JWKS).unwrap()["keys"][0].clone()
            ]
        });
        let set = SigningKeySet::from_json(doc.to_string().as_bytes()).unwrap();
        assert_eq!(set.key_ids(), vec!["k1"]);
    }

    #[test]
    fn empty_key_set_is_an_error() {
        let err = SigningKeySet::from_json(br#"{"keys":[]}"#).err().unwrap();
        assert!(matches!(err, AuthError::KeySetFetch(_)));
    }

    #[tokio::test]
    async fn cache_initially_empty() {
        let cache = KeySetCache::new("http://127.0.0.1:9/jwks.json", reqwest::Client::new());
        assert!(!cache.is_cached().await);
        assert!(cache.key_ids().await.is_empty());
    }

    #[tokio::test]
    async fn first_lookup_loads_the_key_set_once() {
        let server = MockServer::start().await;
        serve_jwks(&server, K1_JWKS, 1).await;
        let cache = cache_for(&server);

        assert!(cache.get_key("k1").await.unwrap().is_some());
        assert!(cache.get_key("k1").await.unwrap().is_some());
        assert!(cache.get_key("nope").await.unwrap().is_none());
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server).with_seed(seed);

        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::KeySetFetch(_)));
        assert_eq!(cache.key_ids().await, vec!["k1"]);
    }

    #[tokio::test]
    async fn stale_set_is_served_when_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server)
            .with_ttl(Duration::ZERO)
            .with_seed(seed);

        let key = cache.get_key("k1").await.unwrap();
        assert!(key.is_some());
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn outage_on_stale_set_costs_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(400)))
            .mount(&server)
            .await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server)
            .with_ttl(Duration::ZERO)
            .with_seed(seed);

        let started = Instant::now();
        let lookups: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_key("k1").await })
            })
            .collect();
        for lookup in lookups {
            assert!(lookup.await.unwrap().unwrap().is_some());
        }
        assert!(started.elapsed() < Duration::from_millis(1500));

        // Later lookups back off instead of hitting the provider again.
        for _ in 0..3 {
            assert!(cache.get_key("k1").await.unwrap().is_some());
        }
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn cold_cache_backs_off_after_failed_load() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let cache = cache_for(&server);

        for _ in 0..3 {
            let err = cache.get_key("k1").await.unwrap_err();
            assert!(matches!(err, AuthError::KeySetFetch(_)));
        }
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn distinct_unknown_kids_share_one_forced_refresh() {
        let server = MockServer::start().await;
        serve_jwks(&server, K1_JWKS, 1).await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server).with_seed(seed);

        assert!(cache.force_refresh_for("bogus0").await.unwrap());
        for i in 1..20 {
            assert!(!cache.force_refresh_for(&format!("bogus{i}")).await.unwrap());
        }
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn forced_refresh_happens_once_per_unknown_kid() {
        let server = MockServer::start().await;
        serve_jwks(&server, K1_JWKS, 1).await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server).with_seed(seed);

        assert!(cache.force_refresh_for("bogus").await.unwrap());
        assert!(!cache.force_refresh_for("bogus").await.unwrap());
        assert!(!cache.force_refresh_for("bogus").await.unwrap());
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn scheduled_refresh_resets_forced_memory() {
        let server = MockServer::start().await;
        serve_jwks(&server, K1_JWKS, 3).await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server).with_seed(seed);

        assert!(cache.force_refresh_for("bogus").await.unwrap());
        cache.refresh().await.unwrap();
        assert!(cache.force_refresh_for("bogus").await.unwrap());
        assert_eq!(cache.refresh_count(), 3);
    }

    #[tokio::test]
    async fn refresh_swaps_in_new_keys() {
        let server = MockServer::start().await;
        serve_jwks(&server, K1_K2_JWKS, 1).await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server).with_seed(seed);
        assert!(cache.cached_key("k2").await.is_none());

        cache.refresh().await.unwrap();
        assert_eq!(cache.key_ids().await, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn refresh_replaces_the_whole_set() {
        let server = MockServer::start().await;
        serve_jwks(&server, K2_JWKS, 1).await;

        let seed = SigningKeySet::from_json(K1_JWKS.as_bytes()).unwrap();
        let cache = cache_for(&server).with_seed(seed);

        cache.refresh().await.unwrap();
        assert_eq!(cache.key_ids().await, vec!["k2"]);
        assert!(cache.cached_key("k1").await.is_none());
    }
}
