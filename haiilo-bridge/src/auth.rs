//! Bearer token handling for browser-facing routes.
//!
//! The bridge does not validate these tokens itself; they are vendor access
//! tokens passed straight through to the vendor API, which is the authority
//! on whether they are any good.

/// Extracts a bearer token from an Authorization header value.
///
/// Returns the token if present and non-empty, or None otherwise.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(feature = "axum")]
pub mod axum_extractors {
    //! Axum extractors for bearer-authenticated requests.

    use super::*;
    use crate::error::Error;
    use axum::{extract::FromRequestParts, http::request::Parts};

    /// The caller's bearer token.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// async fn handler(BearerToken(token): BearerToken) -> String {
    ///     format!("token has {} bytes", token.len())
    /// }
    /// ```
    #[derive(Debug, Clone)]
    pub struct BearerToken(pub String);

    impl<S> FromRequestParts<S> for BearerToken
    where
        S: Send + Sync,
    {
        type Rejection = Error;

        async fn from_request_parts(
            parts: &mut Parts,
            _state: &S,
        ) -> Result<Self, Self::Rejection> {
            parts
                .headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(extract_bearer_token)
                .map(|token| BearerToken(token.to_string()))
                .ok_or(Error::MissingBearerToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_tokens() {
        assert_eq!(extract_bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic dXNlcjpwYXNz"), None);
    }
}
