use crate::config::{BridgeConfig, ClientCredentials};
use crate::error::{Error, Result};
use crate::transport::{map_send_error, read_body};
use chrono::Utc;
use http::header::ACCEPT;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

const TOKEN_CALL: &str = "token endpoint";

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// A bearer token and the instant it stops being usable.
///
/// Value and expiry are always replaced together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    value: String,
    expires_at_ms: i64,
}

impl CachedToken {
    pub fn new(value: impl Into<String>, expires_at_ms: i64) -> Self {
        Self {
            value: value.into(),
            expires_at_ms,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    pub fn is_usable_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// OAuth grant used when the cache has to go to the token endpoint
#[derive(Debug, Clone)]
pub enum Grant {
    ClientCredentials {
        scope: String,
    },
    AuthorizationCode {
        code: String,
        redirect_uri: Option<Url>,
        scope: String,
    },
}

impl Grant {
    pub fn client_credentials(scope: impl Into<String>) -> Self {
        Grant::ClientCredentials {
            scope: scope.into(),
        }
    }

    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::ClientCredentials { .. } => "client_credentials",
            Grant::AuthorizationCode { .. } => "authorization_code",
        }
    }

    fn form_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("grant_type", self.grant_type().to_string())];
        match self {
            Grant::ClientCredentials { scope } => {
                params.push(("scope", scope.clone()));
            }
            Grant::AuthorizationCode {
                code,
                redirect_uri,
                scope,
            } => {
                params.push(("code", code.clone()));
                params.push(("scope", scope.clone()));
                if let Some(uri) = redirect_uri {
                    params.push(("redirect_uri", uri.to_string()));
                }
            }
        }
        params
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Holds the vendor access token and refreshes it when it runs out.
///
/// The lock is held across the token endpoint call, so callers that find the
/// token stale while a refresh is in flight wait for it and reuse its result.
pub struct TokenCache {
    http: reqwest::Client,
    token_url: Url,
    credentials: ClientCredentials,
    scope: String,
    redirect_uri: Option<Url>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(
        http: reqwest::Client,
        token_url: Url,
        credentials: ClientCredentials,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            token_url,
            credentials,
            scope: crate::config::DEFAULT_SCOPE.to_string(),
            redirect_uri: None,
            clock,
            cached: Mutex::new(None),
        }
    }

    pub fn from_config(config: &BridgeConfig, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        let mut cache = Self::new(http, config.token_url(), config.credentials.clone(), clock);
        cache.scope = config.scope.clone();
        cache.redirect_uri = config.redirect_uri.clone();
        cache
    }

    /// Client-credentials grant for the configured scope
    pub fn default_grant(&self) -> Grant {
        Grant::client_credentials(self.scope.clone())
    }

    /// Return the cached token while it is usable, otherwise run `grant`
    /// against the token endpoint and cache the result.
    pub async fn get_valid_token(&self, grant: &Grant) -> Result<String> {
        let mut cached = self.cached.lock().await;

        let now = self.clock.now_ms();
        if let Some(token) = cached.as_ref().filter(|t| t.is_usable_at(now)) {
            tracing::debug!(expires_at_ms = token.expires_at_ms, "reusing cached access token");
            return Ok(token.value.clone());
        }

        let fresh = self.request_token(grant).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);

        Ok(value)
    }

    /// Exchange a one-time authorization code. Always hits the endpoint and
    /// replaces whatever is cached.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<String> {
        let grant = Grant::AuthorizationCode {
            code: code.to_string(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
        };

        let mut cached = self.cached.lock().await;
        let fresh = self.request_token(&grant).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);

        Ok(value)
    }

    /// Store a token pushed by the vendor instead of fetching one.
    pub async fn supply(&self, value: impl Into<String>, expires_in_secs: Option<i64>) {
        let token = CachedToken::new(value, self.expiry_from(expires_in_secs));
        tracing::info!(expires_at_ms = token.expires_at_ms, "stored vendor supplied access token");
        *self.cached.lock().await = Some(token);
    }

    /// The cached token, usable or not
    pub async fn current(&self) -> Option<CachedToken> {
        self.cached.lock().await.clone()
    }

    async fn request_token(&self, grant: &Grant) -> Result<CachedToken> {
        tracing::info!(
            grant_type = grant.grant_type(),
            url = %self.token_url,
            "requesting access token"
        );

        let response = self
            .http
            .post(self.token_url.clone())
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .header(ACCEPT, "application/json")
            .form(&grant.form_params())
            .send()
            .await
            .map_err(|e| map_send_error(TOKEN_CALL, e))?;

        let status = response.status().as_u16();
        let body = read_body(TOKEN_CALL, response).await?;

        if !(200..300).contains(&status) {
            tracing::warn!(status, "token endpoint rejected the request");
            return Err(Error::AuthFailure { status, body });
        }

        let access_token = serde_json::from_str::<TokenResponse>(&body)
            .ok()
            .and_then(|r| {
                r.access_token
                    .filter(|t| !t.is_empty())
                    .map(|t| (t, r.expires_in))
            });

        let Some((access_token, expires_in)) = access_token else {
            tracing::warn!(status, "token endpoint response carried no access_token");
            return Err(Error::AuthFailure { status, body });
        };

        let token = CachedToken::new(access_token, self.expiry_from(expires_in));
        tracing::info!(expires_at_ms = token.expires_at_ms, "obtained access token");

        Ok(token)
    }

    fn expiry_from(&self, expires_in_secs: Option<i64>) -> i64 {
        let secs = expires_in_secs.unwrap_or(DEFAULT_EXPIRES_IN_SECS).max(0);
        self.clock.now_ms().saturating_add(secs.saturating_mul(1000))
    }
}
