use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::transport::{map_send_error, read_body};
use http::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

const USERS_CALL: &str = "users request";

/// Optional paging forwarded to the users endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl Pagination {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page: Some(page),
            size: Some(size),
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(page) = self.page {
            query.push(("page", page.to_string()));
        }
        if let Some(size) = self.size {
            query.push(("size", size.to_string()));
        }
        query
    }
}

/// Relays `GET /api/users` to the vendor on behalf of a browser client.
#[derive(Debug, Clone)]
pub struct UserProxy {
    http: reqwest::Client,
    users_url: Url,
    client_id: Option<String>,
    accept_version: Option<String>,
}

impl UserProxy {
    pub fn new(http: reqwest::Client, users_url: Url) -> Self {
        Self {
            http,
            users_url,
            client_id: None,
            accept_version: None,
        }
    }

    pub fn from_config(config: &BridgeConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            users_url: config.users_url(),
            client_id: Some(config.credentials.client_id.clone()),
            accept_version: config.accept_version.clone(),
        }
    }

    /// Fetch a page of users with `token`, returning the vendor JSON unchanged.
    pub async fn fetch_users(&self, token: &str, page: Pagination) -> Result<Value> {
        tracing::info!(url = %self.users_url, page = ?page.page, size = ?page.size, "fetching users");

        let mut request = self
            .http
            .get(self.users_url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .query(&page.query());

        if let Some(client_id) = &self.client_id {
            request = request.header("X-Client-ID", client_id);
        }
        if let Some(version) = &self.accept_version {
            request = request.header("Accept-Version", version);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(USERS_CALL, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = read_body(USERS_CALL, response).await?;

        tracing::info!(status, content_type = %content_type, "users endpoint responded");

        if !(200..300).contains(&status) {
            return Err(Error::UpstreamError { status, body });
        }

        if !is_json(&content_type) {
            return Err(Error::UnexpectedContentType { content_type, body });
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "users endpoint sent unparseable JSON");
            Error::UnexpectedContentType { content_type, body }
        })
    }
}

fn is_json(content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_type == "application/json" || media_type.ends_with("+json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_media_types() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json;charset=UTF-8"));
        assert!(is_json("application/hal+json"));
        assert!(!is_json("text/html; charset=utf-8"));
        assert!(!is_json(""));
    }

    #[test]
    fn pagination_only_sends_present_fields() {
        assert!(Pagination::default().query().is_empty());
        assert_eq!(
            Pagination {
                page: Some(2),
                size: None
            }
            .query(),
            vec![("page", "2".to_string())]
        );
    }
}
