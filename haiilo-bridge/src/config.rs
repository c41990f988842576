use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Key set published by the plugin platform for lifecycle tokens.
pub const DEFAULT_JWKS_URL: &str = "https://certificates.plugins.coyoapp.com/.well-known/jwks.json";

pub const DEFAULT_SCOPE: &str = "plugin:notify";

/// OAuth client identity used against the vendor token endpoint
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret_set", &!self.client_secret.is_empty())
            .finish()
    }
}

/// Configuration for the plugin bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Vendor base URL hosting `/api/oauth/token` and `/api/users`
    pub base_url: Url,

    /// Client credentials for the token endpoint
    pub credentials: ClientCredentials,

    /// Scope requested on token grants
    pub scope: String,

    /// Redirect URI for the authorization-code grant
    pub redirect_uri: Option<Url>,

    /// Key set used when a token header carries no `jku`
    pub jwks_url: Url,

    /// Key set URLs a token may point at; always includes `jwks_url`
    pub jku_allowlist: Vec<Url>,

    /// Substring the `iss` claim of lifecycle tokens must contain
    pub expected_issuer: Option<String>,

    /// Expected `aud` claim, unchecked when unset
    pub audience: Option<String>,

    /// Timeout applied to every outbound request (default: 10s)
    pub request_timeout: Duration,

    /// How long a fetched key set stays fresh (default: 300s, zero disables caching)
    pub jwks_cache_ttl: Duration,

    /// Minimum gap between refetches caused by unknown kids (default: 30s)
    pub jwks_min_refetch_interval: Duration,

    /// Optional `Accept-Version` header for the users API
    pub accept_version: Option<String>,

    /// Allowed CORS origin, any origin when unset
    pub cors_allowed_origin: Option<String>,
}

impl BridgeConfig {
    /// Create a new configuration with sensible defaults.
    ///
    /// `base_url` must be hierarchical (`http`/`https`); its query and
    /// fragment are dropped and its path gains a trailing slash.
    pub fn new(base_url: Url, credentials: ClientCredentials) -> Self {
        let jwks_url = Url::parse(DEFAULT_JWKS_URL).expect("valid url");

        Self {
            base_url: normalize_base(base_url),
            credentials,
            scope: DEFAULT_SCOPE.to_string(),
            redirect_uri: None,
            jku_allowlist: vec![jwks_url.clone()],
            jwks_url,
            expected_issuer: None,
            audience: None,
            request_timeout: Duration::from_secs(10),
            jwks_cache_ttl: Duration::from_secs(300),
            jwks_min_refetch_interval: Duration::from_secs(30),
            accept_version: None,
            cors_allowed_origin: None,
        }
    }

    /// Load the configuration from `HAIILO_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| Error::Configuration(format!("{} is not set", key)))
        };

        let base_url = parse_base_url(&required("HAIILO_BASE_URL")?)?;
        let credentials = ClientCredentials::new(
            required("HAIILO_CLIENT_ID")?,
            required("HAIILO_CLIENT_SECRET")?,
        );

        let mut config = Self::new(base_url, credentials);

        if let Some(scope) = var("HAIILO_SCOPE") {
            config = config.with_scope(scope);
        }
        if let Some(uri) = var("HAIILO_REDIRECT_URI") {
            config = config.with_redirect_uri(parse_url("HAIILO_REDIRECT_URI", &uri)?);
        }
        if let Some(url) = var("HAIILO_JWKS_URL") {
            config = config.with_jwks_url(parse_url("HAIILO_JWKS_URL", &url)?);
        }
        if let Some(list) = var("HAIILO_JKU_ALLOWLIST") {
            let urls = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_url("HAIILO_JKU_ALLOWLIST", s))
                .collect::<Result<Vec<_>>>()?;
            config = config.with_jku_allowlist(urls);
        }
        if let Some(issuer) = var("HAIILO_EXPECTED_ISSUER") {
            config = config.with_expected_issuer(issuer);
        }
        if let Some(audience) = var("HAIILO_AUDIENCE") {
            config = config.with_audience(audience);
        }
        if let Some(secs) = var("HAIILO_REQUEST_TIMEOUT_SECS") {
            config = config.with_request_timeout(Duration::from_secs(parse_secs(
                "HAIILO_REQUEST_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(secs) = var("HAIILO_JWKS_CACHE_TTL_SECS") {
            config = config.with_jwks_cache_ttl(Duration::from_secs(parse_secs(
                "HAIILO_JWKS_CACHE_TTL_SECS",
                &secs,
            )?));
        }
        if let Some(secs) = var("HAIILO_JWKS_MIN_REFETCH_SECS") {
            config = config.with_jwks_min_refetch_interval(Duration::from_secs(parse_secs(
                "HAIILO_JWKS_MIN_REFETCH_SECS",
                &secs,
            )?));
        }
        if let Some(version) = var("HAIILO_ACCEPT_VERSION") {
            config = config.with_accept_version(version);
        }
        if let Some(origin) = var("HAIILO_CORS_ALLOWED_ORIGIN") {
            config = config.with_cors_allowed_origin(origin);
        }

        Ok(config)
    }

    /// Set the requested scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Set the redirect URI for authorization-code exchanges
    pub fn with_redirect_uri(mut self, uri: Url) -> Self {
        self.redirect_uri = Some(uri);
        self
    }

    /// Set the fallback key set URL; it is allow-listed implicitly
    pub fn with_jwks_url(mut self, url: Url) -> Self {
        self.jku_allowlist.retain(|u| *u != self.jwks_url);
        self.jwks_url = url;
        self.ensure_jwks_url_allowed();
        self
    }

    /// Replace the `jku` allow-list
    pub fn with_jku_allowlist(mut self, urls: Vec<Url>) -> Self {
        self.jku_allowlist = urls;
        self.ensure_jwks_url_allowed();
        self
    }

    /// Require the `iss` claim to contain this substring
    pub fn with_expected_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Require this `aud` claim
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Set the outbound request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the key set cache TTL
    pub fn with_jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    /// Set the minimum gap between kid-miss refetches of one key set
    pub fn with_jwks_min_refetch_interval(mut self, interval: Duration) -> Self {
        self.jwks_min_refetch_interval = interval;
        self
    }

    /// Set the `Accept-Version` header sent to the users API
    pub fn with_accept_version(mut self, version: impl Into<String>) -> Self {
        self.accept_version = Some(version.into());
        self
    }

    /// Restrict CORS to a single origin
    pub fn with_cors_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_allowed_origin = Some(origin.into());
        self
    }

    /// Vendor token endpoint
    pub fn token_url(&self) -> Url {
        self.endpoint("api/oauth/token")
    }

    /// Vendor users endpoint
    pub fn users_url(&self) -> Url {
        self.endpoint("api/users")
    }

    fn endpoint(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .expect("hierarchical base url joined with a relative path")
    }

    fn ensure_jwks_url_allowed(&mut self) {
        if !self.jku_allowlist.contains(&self.jwks_url) {
            self.jku_allowlist.push(self.jwks_url.clone());
        }
    }
}

fn normalize_base(mut url: Url) -> Url {
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_base_url(value: &str) -> Result<Url> {
    const KEY: &str = "HAIILO_BASE_URL";
    let url = parse_url(KEY, value)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Configuration(format!(
            "{}: unsupported scheme {}",
            KEY,
            url.scheme()
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::Configuration(format!(
            "{}: must not carry a query or fragment",
            KEY
        )));
    }

    Ok(url)
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    Url::parse(value.trim()).map_err(|e| Error::Configuration(format!("{}: {}", key, e)))
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::Configuration(format!("{}: {}", key, e)))
}
