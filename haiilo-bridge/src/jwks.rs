//! Verification of vendor-signed JWTs against a JSON Web Key Set.
//!
//! The key set location comes from the token's `jku` header or, when absent,
//! from the configured JWKS URL. Either way the URL must be on the allow-list
//! before anything is fetched: a `jku` is attacker-controlled input until it
//! has been matched against trusted locations.
//!
//! Only RS256 and RS512 are accepted. `none` does not even parse as a header,
//! and HMAC algorithms are refused before any key lookup.

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::token::Clock;
use crate::transport::{map_send_error, read_body};
use http::header::ACCEPT;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

const JWKS_CALL: &str = "key set fetch";

/// Signature algorithms accepted on lifecycle tokens
pub const ALLOWED_ALGORITHMS: [Algorithm; 2] = [Algorithm::RS256, Algorithm::RS512];

/// Shortest gap between two fetches of one key set triggered by unknown kids.
pub const DEFAULT_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

struct CachedKeySet {
    keys: JwkSet,
    fetched_at_ms: i64,
}

/// Key sets by URL, each fresh for `ttl`.
pub struct JwksCache {
    http: reqwest::Client,
    ttl: Duration,
    min_refetch_interval: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<Url, CachedKeySet>>,
}

impl JwksCache {
    pub fn new(http: reqwest::Client, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            ttl,
            min_refetch_interval: DEFAULT_MIN_REFETCH_INTERVAL,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Set how soon an unknown kid may trigger another fetch of the same set
    pub fn with_min_refetch_interval(mut self, interval: Duration) -> Self {
        self.min_refetch_interval = interval;
        self
    }

    /// Find `kid` in the key set at `url`.
    ///
    /// A cached set that lacks the kid is refetched, so rotated keys are
    /// picked up without waiting for the TTL. Such refetches happen at most
    /// once per `min_refetch_interval` for each URL.
    pub async fn key(&self, url: &Url, kid: &str) -> Result<Jwk> {
        if let Some((keys, age_ms)) = self.fresh(url).await {
            if let Some(jwk) = keys.find(kid) {
                return Ok(jwk.clone());
            }
            if age_ms < self.min_refetch_interval.as_millis() as i64 {
                tracing::debug!(%url, kid, age_ms, "kid missing from recently fetched key set");
                return Err(Error::KeyNotFound(kid.to_string()));
            }
            tracing::debug!(%url, kid, "kid missing from cached key set, refetching");
        }

        let keys = self.fetch(url).await?;
        let jwk = keys.find(kid).cloned();

        if !self.ttl.is_zero() {
            self.entries.write().await.insert(
                url.clone(),
                CachedKeySet {
                    keys,
                    fetched_at_ms: self.clock.now_ms(),
                },
            );
        }

        jwk.ok_or_else(|| Error::KeyNotFound(kid.to_string()))
    }

    async fn fresh(&self, url: &Url) -> Option<(JwkSet, i64)> {
        let entries = self.entries.read().await;
        let cached = entries.get(url)?;
        let age_ms = self.clock.now_ms().saturating_sub(cached.fetched_at_ms);
        (age_ms < self.ttl.as_millis() as i64).then(|| (cached.keys.clone(), age_ms))
    }

    async fn fetch(&self, url: &Url) -> Result<JwkSet> {
        tracing::info!(%url, "fetching key set");

        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| map_send_error(JWKS_CALL, e))?;

        let status = response.status().as_u16();
        let body = read_body(JWKS_CALL, response).await?;

        if !(200..300).contains(&status) {
            return Err(Error::UpstreamError { status, body });
        }

        parse_key_set(&body)
    }
}

/// Parse a JWKS document, skipping entries whose key type is not understood.
pub fn parse_key_set(body: &str) -> Result<JwkSet> {
    #[derive(serde::Deserialize)]
    struct RawKeySet {
        keys: Vec<serde_json::Value>,
    }

    let raw: RawKeySet = serde_json::from_str(body)
        .map_err(|e| Error::InvalidKeySet(format!("invalid JWKS document: {}", e)))?;

    let keys = raw
        .keys
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
            Ok(jwk) => Some(jwk),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unusable key set entry");
                None
            }
        })
        .collect();

    Ok(JwkSet { keys })
}

/// Verifies vendor-issued JWTs
pub struct JwksVerifier {
    keys: JwksCache,
    allowlist: Vec<Url>,
    default_jwks_url: Option<Url>,
    expected_issuer: Option<String>,
    audience: Option<String>,
}

impl JwksVerifier {
    pub fn new(keys: JwksCache, allowlist: Vec<Url>) -> Self {
        Self {
            keys,
            allowlist,
            default_jwks_url: None,
            expected_issuer: None,
            audience: None,
        }
    }

    pub fn from_config(config: &BridgeConfig, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        let keys = JwksCache::new(http, config.jwks_cache_ttl, clock)
            .with_min_refetch_interval(config.jwks_min_refetch_interval);
        let mut verifier = Self::new(keys, config.jku_allowlist.clone())
            .with_default_jwks_url(config.jwks_url.clone());
        verifier.expected_issuer = config.expected_issuer.clone();
        verifier.audience = config.audience.clone();
        verifier
    }

    /// Key set used for tokens without a `jku`; it must also be allow-listed
    pub fn with_default_jwks_url(mut self, url: Url) -> Self {
        self.default_jwks_url = Some(url);
        self
    }

    /// Require `iss` to contain `issuer`
    pub fn with_expected_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Require `aud` to equal `audience`
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Verify `token` and deserialize its claims.
    pub async fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::MalformedToken(format!("unreadable header: {}", e)))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            tracing::warn!(alg = ?header.alg, "rejecting token signed with a disallowed algorithm");
            return Err(Error::InvalidSignature(format!(
                "algorithm {:?} is not permitted",
                header.alg
            )));
        }

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| Error::MalformedToken("header has no kid".to_string()))?;

        let jwks_url = match header.jku.as_deref() {
            Some(jku) => Url::parse(jku)
                .map_err(|e| Error::MalformedToken(format!("invalid jku: {}", e)))?,
            None => self.default_jwks_url.clone().ok_or_else(|| {
                Error::MalformedToken("header has no jku and no key set is configured".to_string())
            })?,
        };

        if !self.allowlist.contains(&jwks_url) {
            tracing::warn!(url = %jwks_url, "rejecting token with untrusted key set url");
            return Err(Error::UntrustedKeySource(jwks_url.to_string()));
        }

        let jwk = self.keys.key(&jwks_url, kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| Error::InvalidSignature(format!("unusable key {}: {}", kid, e)))?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = ALLOWED_ALGORITHMS.to_vec();
        validation.required_spec_claims = HashSet::new();
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation)
            .map_err(map_decode_error)?;

        if let Some(expected) = &self.expected_issuer {
            let iss = data.claims.get("iss").and_then(|v| v.as_str()).unwrap_or("");
            if !iss.contains(expected.as_str()) {
                tracing::warn!(iss, "rejecting token from unexpected issuer");
                return Err(Error::InvalidClaims(format!("issuer {:?} is not accepted", iss)));
            }
        }

        tracing::debug!(kid, url = %jwks_url, "token verified");

        serde_json::from_value(data.claims)
            .map_err(|e| Error::MalformedToken(format!("unexpected claims: {}", e)))
    }
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> Error {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidRsaKey(_) => Error::InvalidSignature(err.to_string()),
        ErrorKind::ExpiredSignature
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidSubject
        | ErrorKind::MissingRequiredClaim(_) => Error::InvalidClaims(err.to_string()),
        _ => Error::MalformedToken(err.to_string()),
    }
}
