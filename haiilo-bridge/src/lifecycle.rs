//! Lifecycle webhooks sent by the plugin platform.
//!
//! Every delivery carries a signed JWT whose `sub` names the event. Each
//! request is independent: verify, acknowledge, forget.

use crate::error::{Error, Result};
use crate::jwks::JwksVerifier;
use crate::token::TokenCache;
use http::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

/// The five lifecycle notifications the platform sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventKind {
    Install,
    Uninstall,
    InstanceAdd,
    InstanceRemove,
    AccessToken,
}

impl LifecycleEventKind {
    pub const ALL: [LifecycleEventKind; 5] = [
        LifecycleEventKind::Install,
        LifecycleEventKind::Uninstall,
        LifecycleEventKind::InstanceAdd,
        LifecycleEventKind::InstanceRemove,
        LifecycleEventKind::AccessToken,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::Install => "install",
            LifecycleEventKind::Uninstall => "uninstall",
            LifecycleEventKind::InstanceAdd => "instance_add",
            LifecycleEventKind::InstanceRemove => "instance_remove",
            LifecycleEventKind::AccessToken => "access_token",
        }
    }

    pub fn ack_message(&self) -> &'static str {
        match self {
            LifecycleEventKind::Install => "Plugin installed successfully",
            LifecycleEventKind::Uninstall => "Plugin uninstalled successfully",
            LifecycleEventKind::InstanceAdd => "Instance added successfully",
            LifecycleEventKind::InstanceRemove => "Instance removed successfully",
            LifecycleEventKind::AccessToken => "Access token processed successfully",
        }
    }
}

/// Verified claims of a lifecycle token
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleEvent {
    /// Event kind
    pub sub: String,
    /// Issuer (platform tenant)
    #[serde(default)]
    pub iss: Option<String>,
    /// Vendor token carried by `access_token` events
    #[serde(default)]
    pub access_token: Option<String>,
    /// Lifetime of `access_token` in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Remaining claims (tenant, instance ids, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    Json,
    Form,
    Unspecified,
}

fn body_format(content_type: Option<&str>) -> Result<BodyFormat> {
    let Some(content_type) = content_type else {
        return Ok(BodyFormat::Unspecified);
    };

    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/json" => Ok(BodyFormat::Json),
        "application/x-www-form-urlencoded" => Ok(BodyFormat::Form),
        "" => Ok(BodyFormat::Unspecified),
        other => Err(Error::UnsupportedMediaType(other.to_string())),
    }
}

/// Decode a request body sent either as JSON or as a form.
///
/// With no content type JSON is tried first, then form encoding.
pub fn decode_body<T: DeserializeOwned>(body: &str, content_type: Option<&str>) -> Result<T> {
    match body_format(content_type)? {
        BodyFormat::Json => serde_json::from_str(body)
            .map_err(|e| Error::InvalidRequest(format!("invalid JSON: {}", e))),
        BodyFormat::Form => serde_urlencoded::from_str(body)
            .map_err(|e| Error::InvalidRequest(format!("invalid form data: {}", e))),
        BodyFormat::Unspecified => serde_json::from_str(body)
            .or_else(|_| serde_urlencoded::from_str(body))
            .map_err(|e| Error::InvalidRequest(format!("invalid request body: {}", e))),
    }
}

/// Maps verified lifecycle tokens to their acknowledgements.
pub struct LifecycleDispatcher {
    verifier: Arc<JwksVerifier>,
    tokens: Arc<TokenCache>,
}

impl LifecycleDispatcher {
    pub fn new(verifier: Arc<JwksVerifier>, tokens: Arc<TokenCache>) -> Self {
        Self { verifier, tokens }
    }

    /// Handle a delivery whose kind is taken from the token's `sub`.
    pub async fn handle(&self, body: &str, content_type: Option<&str>) -> (StatusCode, Value) {
        respond(self.dispatch(body, content_type, None).await)
    }

    /// Handle a delivery to `/lifecycle/{kind}`; `sub` must name the same kind.
    pub async fn handle_for_path(
        &self,
        kind: &str,
        body: &str,
        content_type: Option<&str>,
    ) -> (StatusCode, Value) {
        let Some(expected) = LifecycleEventKind::parse(kind) else {
            tracing::warn!(kind, "lifecycle delivery to unknown path");
            return respond(Err(Error::UnknownLifecycleEvent));
        };

        respond(self.dispatch(body, content_type, Some(expected)).await)
    }

    /// Verify the delivery and apply its side effects.
    pub async fn dispatch(
        &self,
        body: &str,
        content_type: Option<&str>,
        expected: Option<LifecycleEventKind>,
    ) -> Result<LifecycleEventKind> {
        body_format(content_type)?;
        if body.trim().is_empty() {
            return Err(Error::MissingToken);
        }

        let token = decode_body::<WebhookBody>(body, content_type)?
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or(Error::MissingToken)?;

        let event: LifecycleEvent = self.verifier.verify(token.trim()).await?;

        let kind = LifecycleEventKind::parse(&event.sub).ok_or_else(|| {
            tracing::warn!(sub = %event.sub, "unknown lifecycle event");
            Error::UnknownLifecycleEvent
        })?;

        if expected.is_some_and(|expected| expected != kind) {
            return Err(Error::InvalidRequest(format!(
                "token subject {} does not match the delivery path",
                kind.as_str()
            )));
        }

        if kind == LifecycleEventKind::AccessToken {
            let access_token = event
                .access_token
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    Error::MalformedToken("access_token event carries no access_token".to_string())
                })?;
            self.tokens.supply(access_token, event.expires_in).await;
        }

        tracing::info!(
            event = kind.as_str(),
            iss = event.iss.as_deref().unwrap_or_default(),
            "lifecycle event acknowledged"
        );

        Ok(kind)
    }
}

fn respond(outcome: Result<LifecycleEventKind>) -> (StatusCode, Value) {
    match outcome {
        Ok(kind) => (
            StatusCode::CREATED,
            json!({ "message": kind.ack_message() }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "lifecycle delivery rejected");
            (e.status_code(), e.to_body())
        }
    }
}
