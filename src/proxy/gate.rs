//! Request gatekeeper.
//!
//! Shape checks only: the path must sit under one of the proxied route
//! prefixes and the credential header must look like a bearer token.
//! Credential validity is the upstream's responsibility.

use axum::http::{header, HeaderMap};

use crate::error::Error;

/// Route prefixes the proxy will forward. Anything else is a 404.
const ALLOWED_PREFIXES: &[&str] = &["/chat/completions", "/completions", "/models"];

/// Whether a request path falls inside the allow-list.
pub fn route_allowed(path: &str) -> bool {
    ALLOWED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Screen an inbound request before any forwarding work begins.
///
/// Path check first (404), then credential shape (401). No shared state is
/// touched; CORS preflight is handled before this runs.
pub fn screen(path: &str, headers: &HeaderMap) -> Result<(), Error> {
    if !route_allowed(path) {
        return Err(Error::RouteNotAllowed);
    }

    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) if value.starts_with("Bearer ") => Ok(()),
        _ => Err(Error::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-test-123"),
        );
        headers
    }

    #[test]
    fn allowed_routes_pass() {
        for path in [
            "/chat/completions",
            "/chat/completions/extra",
            "/completions",
            "/models",
            "/models/glm-4.6",
        ] {
            assert!(route_allowed(path), "{path} should be allowed");
            assert!(screen(path, &bearer_headers()).is_ok());
        }
    }

    #[test]
    fn unknown_route_rejected_before_auth() {
        // No auth header at all, but the path check runs first
        let result = screen("/embeddings", &HeaderMap::new());
        assert!(matches!(result, Err(Error::RouteNotAllowed)));
    }

    #[test]
    fn missing_authorization_rejected() {
        let result = screen("/chat/completions", &HeaderMap::new());
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[test]
    fn non_bearer_scheme_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        let result = screen("/chat/completions", &headers);
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[test]
    fn bearer_without_space_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearersk-1"));
        let result = screen("/chat/completions", &headers);
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[test]
    fn credential_content_is_not_validated() {
        // Shape only: an obviously fake token still passes the gate
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        assert!(screen("/models", &headers).is_ok());
    }
}
