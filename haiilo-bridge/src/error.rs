use http::StatusCode;
use serde_json::{Value, json};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Token endpoint errors
    #[error("token endpoint rejected the request ({status})")]
    AuthFailure { status: u16, body: String },

    // Verification errors
    #[error("key set url is not allow-listed: {0}")]
    UntrustedKeySource(String),
    #[error("no key with kid {0} in key set")]
    KeyNotFound(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid claims: {0}")]
    InvalidClaims(String),
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("invalid key set: {0}")]
    InvalidKeySet(String),

    // Upstream errors
    #[error("unexpected content type {content_type}")]
    UnexpectedContentType { content_type: String, body: String },
    #[error("upstream returned {status}")]
    UpstreamError { status: u16, body: String },
    #[error("{0} timed out")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),

    // Request errors
    #[error("Unknown lifecycle event")]
    UnknownLifecycleEvent,
    #[error("Missing token")]
    MissingToken,
    #[error("Missing Authorization token")]
    MissingBearerToken,
    #[error("unsupported content type: {0}")]
    UnsupportedMediaType(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// HTTP status a caller of this service should see for the error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::AuthFailure { status, .. } => upstream_status(*status),
            Error::UpstreamError { status, .. } => upstream_status(*status),
            Error::UntrustedKeySource(_) => StatusCode::FORBIDDEN,
            Error::KeyNotFound(_)
            | Error::InvalidSignature(_)
            | Error::InvalidClaims(_)
            | Error::MissingBearerToken => StatusCode::UNAUTHORIZED,
            Error::MalformedToken(_)
            | Error::UnknownLifecycleEvent
            | Error::MissingToken
            | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::InvalidKeySet(_)
            | Error::UnexpectedContentType { .. }
            | Error::Network(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `{error, details?}` envelope returned to HTTP callers.
    pub fn to_body(&self) -> Value {
        let (error, details) = match self {
            Error::AuthFailure { body, .. } => ("Token exchange failed", Some(relay_body(body))),
            Error::UpstreamError { body, .. } => ("Upstream request failed", Some(relay_body(body))),
            Error::UnexpectedContentType { content_type, body } => (
                "Unexpected response from API",
                Some(json!({ "contentType": content_type, "body": body })),
            ),
            Error::UntrustedKeySource(url) => ("Untrusted key source", Some(json!(url))),
            Error::KeyNotFound(kid) => ("Signing key not found", Some(json!(kid))),
            Error::InvalidSignature(reason) => ("Invalid token signature", Some(json!(reason))),
            Error::InvalidClaims(reason) => ("Invalid token claims", Some(json!(reason))),
            Error::MalformedToken(reason) => ("Malformed token", Some(json!(reason))),
            Error::InvalidKeySet(reason) => ("Invalid key set", Some(json!(reason))),
            Error::Timeout(call) => ("Upstream timeout", Some(json!(call))),
            Error::Network(reason) => ("Upstream unreachable", Some(json!(reason))),
            Error::UnsupportedMediaType(ct) => ("Unsupported content type", Some(json!(ct))),
            Error::InvalidRequest(reason) => ("Invalid request", Some(json!(reason))),
            // configuration details stay in the logs
            Error::Configuration(_) => ("Internal Server Error", None),
            Error::UnknownLifecycleEvent | Error::MissingToken | Error::MissingBearerToken => {
                return json!({ "error": self.to_string() });
            }
        };

        match details {
            Some(details) => json!({ "error": error, "details": details }),
            None => json!({ "error": error }),
        }
    }
}

fn upstream_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status)
        .ok()
        .filter(|s| s.is_client_error() || s.is_server_error())
        .unwrap_or(StatusCode::BAD_GATEWAY)
}

/// Vendor bodies are relayed as JSON when they parse, raw text otherwise.
fn relay_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }

        (status, axum::Json(self.to_body())).into_response()
    }
}
