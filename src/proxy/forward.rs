//! Upstream request forwarding.
//!
//! Builds and sends the outbound request: same method, path, query string,
//! and body as the inbound request, with headers limited to `Content-Type`
//! and the forwarded credential. Transport failures are classified as
//! unreachable; everything else, including upstream 4xx/5xx, is relayed
//! verbatim to the client.

use axum::http::{header, HeaderValue, Method};
use bytes::Bytes;
use reqwest::Client;

use crate::error::Error;

/// Build the upstream target URL: base + path + query string, verbatim.
pub fn target_url(base: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) => format!("{base}{path}?{q}"),
        None => format!("{base}{path}"),
    }
}

/// Whether an upstream content-type marks a streamed (SSE) response.
pub fn is_event_stream(content_type: &str) -> bool {
    content_type.contains("text/event-stream")
}

/// Send the equivalent request to the upstream.
///
/// Returns the raw `reqwest::Response`; the caller classifies and relays the
/// body. Transport-level failures (DNS, connection refused, timeout) map to
/// [`Error::UpstreamUnreachable`]; no retry is attempted.
pub async fn send(
    client: &Client,
    base_url: &str,
    method: &Method,
    path: &str,
    query: Option<&str>,
    content_type: Option<HeaderValue>,
    authorization: HeaderValue,
    body: Bytes,
) -> Result<reqwest::Response, Error> {
    let url = target_url(base_url, path, query);

    let mut request = client
        .request(method.clone(), &url)
        .header(
            header::CONTENT_TYPE,
            content_type.unwrap_or_else(|| HeaderValue::from_static("application/json")),
        )
        .header(header::AUTHORIZATION, authorization);

    if !body.is_empty() {
        request = request.body(body);
    }

    request.send().await.map_err(|e| {
        tracing::error!(error = %e, url = %url, "Failed to reach upstream");
        Error::UpstreamUnreachable(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_without_query() {
        assert_eq!(
            target_url("https://api.example.com/v4", "/chat/completions", None),
            "https://api.example.com/v4/chat/completions"
        );
    }

    #[test]
    fn target_url_appends_query_verbatim() {
        assert_eq!(
            target_url("https://api.example.com", "/models", Some("limit=5&order=asc")),
            "https://api.example.com/models?limit=5&order=asc"
        );
    }

    #[test]
    fn event_stream_detected_with_charset_suffix() {
        assert!(is_event_stream("text/event-stream"));
        assert!(is_event_stream("text/event-stream; charset=utf-8"));
    }

    #[test]
    fn json_content_type_is_not_a_stream() {
        assert!(!is_event_stream("application/json"));
        assert!(!is_event_stream("text/plain"));
    }
}
