//! Error types for tollgate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for tollgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tollgate.
///
/// Every client-visible variant is terminal for that request only. Parsing
/// anomalies inside the stream extractor never surface here; they are
/// swallowed at the parse site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Not found")]
    RouteNotAllowed,

    #[error("Missing or invalid Authorization header")]
    Unauthorized,

    #[error("Failed to connect to upstream: {0}")]
    UpstreamUnreachable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::RouteNotAllowed => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": "Not found" }),
            ),
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "Missing or invalid Authorization header" }),
            ),
            Error::UpstreamUnreachable(detail) => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": "Failed to connect to upstream",
                    "message": detail,
                }),
            ),
            // Catch-all boundary: anything else surfacing during request
            // handling becomes a generic 502.
            Error::Config(_) | Error::Internal(_) | Error::Database(_) => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": "Proxy error",
                    "message": self.to_string(),
                }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}
