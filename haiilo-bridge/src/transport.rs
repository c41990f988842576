//! Outbound HTTP plumbing shared by the token cache, key set fetches and the
//! users proxy.

use crate::error::{Error, Result};
use std::time::Duration;

const USER_AGENT: &str = concat!("haiilo-bridge/", env!("CARGO_PKG_VERSION"));

/// Build the shared client; every request inherits `timeout`.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build http client: {}", e)))
}

/// Map a transport failure for the named call.
pub(crate) fn map_send_error(call: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        tracing::warn!(call, "outbound request timed out");
        Error::Timeout(call.to_string())
    } else {
        tracing::warn!(call, error = %err, "outbound request failed");
        Error::Network(format!("{}: {}", call, err))
    }
}

/// Read a response body as text, mapping read failures like send failures.
pub(crate) async fn read_body(call: &str, response: reqwest::Response) -> Result<String> {
    response.text().await.map_err(|e| map_send_error(call, e))
}
