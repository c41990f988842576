use crate::{
    auth::axum_extractors::BearerToken,
    config::BridgeConfig,
    error::{Error, Result},
    jwks::JwksVerifier,
    lifecycle::{LifecycleDispatcher, decode_body},
    token::{Clock, SystemClock, TokenCache},
    transport,
    users::{Pagination, UserProxy},
};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// HTTP front of the bridge: lifecycle webhooks in, user listings out.
#[derive(Clone)]
pub struct BridgeServer {
    config: Arc<BridgeConfig>,
    tokens: Arc<TokenCache>,
    lifecycle: Arc<LifecycleDispatcher>,
    users: Arc<UserProxy>,
}

impl BridgeServer {
    /// Create a new bridge server builder.
    pub fn builder() -> BridgeServerBuilder {
        BridgeServerBuilder::default()
    }

    /// The token cache shared by every route
    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Create the axum router with all endpoints.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/lifecycle-event", post(handle_lifecycle_event))
            .route("/lifecycle/{kind}", post(handle_lifecycle_path))
            .route("/api/users", get(handle_users))
            .route("/.netlify/functions/get-users", get(handle_users))
            .route("/api/plugin/users", get(handle_plugin_users))
            .route("/auth/init", post(handle_auth_init))
            .method_not_allowed_fallback(handle_method_not_allowed)
            .layer(cors_layer(&self.config))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }
}

fn cors_layer(config: &BridgeConfig) -> CorsLayer {
    let origin = match config
        .cors_allowed_origin
        .as_deref()
        .and_then(|o| HeaderValue::from_str(o).ok())
    {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// Lifecycle delivery whose kind is carried only in the token.
async fn handle_lifecycle_event(
    State(server): State<BridgeServer>,
    headers: HeaderMap,
    body: String,
) -> Response {
    tracing::info!("handling lifecycle event");
    let (status, body) = server.lifecycle.handle(&body, content_type(&headers)).await;
    (status, Json(body)).into_response()
}

/// Lifecycle delivery to a per-kind path.
async fn handle_lifecycle_path(
    State(server): State<BridgeServer>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    tracing::info!(kind = %kind, "handling lifecycle event");
    let (status, body) = server
        .lifecycle
        .handle_for_path(&kind, &body, content_type(&headers))
        .await;
    (status, Json(body)).into_response()
}

/// Relay the users listing with the caller's own token.
async fn handle_users(
    State(server): State<BridgeServer>,
    BearerToken(token): BearerToken,
    page: std::result::Result<Query<Pagination>, QueryRejection>,
) -> Result<Response> {
    let page = pagination(page)?;
    let users = server.users.fetch_users(&token, page).await?;
    Ok(Json(users).into_response())
}

/// Relay the users listing with the bridge's own client-credentials token.
async fn handle_plugin_users(
    State(server): State<BridgeServer>,
    page: std::result::Result<Query<Pagination>, QueryRejection>,
) -> Result<Response> {
    let page = pagination(page)?;
    let grant = server.tokens.default_grant();
    let token = server.tokens.get_valid_token(&grant).await?;
    let users = server.users.fetch_users(&token, page).await?;
    Ok(Json(users).into_response())
}

fn pagination(query: std::result::Result<Query<Pagination>, QueryRejection>) -> Result<Pagination> {
    query
        .map(|Query(page)| page)
        .map_err(|rejection| Error::InvalidRequest(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
struct AuthInitRequest {
    token: Option<String>,
    code: Option<String>,
}

/// Exchange an authorization code handed over by the plugin frontend.
async fn handle_auth_init(
    State(server): State<BridgeServer>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    tracing::info!("handling auth init");

    let request: AuthInitRequest = decode_body(&body, content_type(&headers))?;
    let code = request
        .token
        .or(request.code)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing authorization code".to_string()))?;

    let access_token = server.tokens.exchange_authorization_code(code.trim()).await?;

    Ok(Json(json!({ "access_token": access_token })).into_response())
}

async fn handle_method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method Not Allowed" })),
    )
        .into_response()
}

// Builder for BridgeServer.
#[derive(Default)]
pub struct BridgeServerBuilder {
    config: Option<BridgeConfig>,
    clock: Option<Arc<dyn Clock>>,
    http_client: Option<reqwest::Client>,
}

impl BridgeServerBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn build(self) -> Result<BridgeServer> {
        let config = self
            .config
            .ok_or_else(|| Error::Configuration("config required".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let http = match self.http_client {
            Some(client) => client,
            None => transport::build_client(config.request_timeout)?,
        };

        let tokens = Arc::new(TokenCache::from_config(&config, http.clone(), clock.clone()));
        let verifier = Arc::new(JwksVerifier::from_config(&config, http.clone(), clock));
        let lifecycle = Arc::new(LifecycleDispatcher::new(verifier, tokens.clone()));
        let users = Arc::new(UserProxy::from_config(&config, http));

        tracing::info!(
            base_url = %config.base_url,
            allowlisted_key_sets = config.jku_allowlist.len(),
            "bridge configured"
        );

        Ok(BridgeServer {
            config: Arc::new(config),
            tokens,
            lifecycle,
            users,
        })
    }
}
