//! The proxy request handler and access log assembly.
//!
//! One handler serves every proxied route: it screens the request, forwards
//! it upstream, relays the response (streamed or buffered), and assembles a
//! log record that is persisted fire-and-forget.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use sqlx::SqlitePool;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::server::AppState;
use super::{forward, gate};
use crate::config::Config;
use crate::cost::{calculate_cost, Usage};
use crate::error::Error;
use crate::proxy::stream::UsageObserver;
use crate::storage::logging::{spawn_log_write, RequestLog};

/// Upper bound on buffered inbound request bodies (10 MiB).
const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Rewrite IPv6-mapped IPv4 addresses to plain dotted form.
///
/// Every other address form passes through unchanged.
pub fn normalize_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

/// Request-side metadata captured before forwarding, turned into a
/// [`RequestLog`] once the response side is known.
struct LogContext {
    request_id: String,
    started: Instant,
    config: Arc<Config>,
    method: String,
    path: String,
    model: String,
    request_json: Option<serde_json::Value>,
    request_size: i64,
    client_ip: Option<String>,
    user_agent: Option<String>,
}

impl LogContext {
    /// Assemble the immutable log record for this request.
    fn finish(
        self,
        response_status: u16,
        streamed: bool,
        response_body: Option<serde_json::Value>,
        usage: Option<&Usage>,
    ) -> RequestLog {
        let total_cost = calculate_cost(&self.config.pricing, &self.model, usage);

        let temperature = self
            .request_json
            .as_ref()
            .and_then(|v| v.get("temperature"))
            .and_then(|v| v.as_f64());
        let max_tokens = self
            .request_json
            .as_ref()
            .and_then(|v| v.get("max_tokens"))
            .and_then(|v| v.as_i64());

        // Response size is the re-encoded JSON length, an approximation of
        // the bytes actually sent (the body was decoded for usage parsing).
        let response_size = response_body
            .as_ref()
            .map(|v| v.to_string().len() as i64)
            .unwrap_or(0);

        RequestLog {
            request_id: self.request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_method: self.method,
            request_path: self.path,
            model: self.model,
            prompt_tokens: usage.and_then(|u| u.prompt_tokens).map(|v| v as i64),
            completion_tokens: usage.and_then(|u| u.completion_tokens).map(|v| v as i64),
            total_tokens: usage.and_then(|u| u.total_tokens).map(|v| v as i64),
            cached_tokens: usage
                .and_then(|u| u.prompt_tokens_details.as_ref())
                .and_then(|d| d.cached_tokens)
                .map(|v| v as i64),
            total_cost,
            response_time_ms: self.started.elapsed().as_millis() as i64,
            request_body: self.request_json.map(|v| v.to_string()),
            response_body: response_body.map(|v| v.to_string()),
            response_status: response_status as i64,
            upstream_url: self.config.upstream.url.clone(),
            client_ip: self.client_ip,
            user_agent: self.user_agent,
            request_size: self.request_size,
            response_size,
            streamed,
            temperature,
            max_tokens,
        }
    }
}

/// Catch-all handler for every proxied route.
pub async fn proxy(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
) -> Result<Response, Error> {
    let started = Instant::now();

    let method = req.method().clone();
    if method == Method::OPTIONS {
        // CORS preflight short-circuits before the gatekeeper; the CorsLayer
        // attaches the permissive headers on the way out.
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let uri = req.uri().clone();
    let path = uri.path().to_string();
    let query = uri.query().map(|q| q.to_string());

    gate::screen(&path, req.headers())?;

    let content_type = req.headers().get(header::CONTENT_TYPE).cloned();
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .cloned()
        .ok_or(Error::Unauthorized)?;
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_ip = connect_info.map(|ConnectInfo(addr)| normalize_ip(addr.ip()));

    let body_bytes = if method == Method::POST {
        axum::body::to_bytes(req.into_body(), MAX_REQUEST_BYTES)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read request body: {e}")))?
    } else {
        Bytes::new()
    };

    // Parsed form is best-effort and used only for logging; the raw bytes
    // are what gets forwarded.
    let request_json: Option<serde_json::Value> = if body_bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&body_bytes).ok()
    };

    let model = request_json
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(|v| v.as_str())
        .unwrap_or("default")
        .to_lowercase();

    let ctx = LogContext {
        request_id: Uuid::new_v4().to_string(),
        started,
        config: state.config.clone(),
        method: method.to_string(),
        path: path.clone(),
        model,
        request_json,
        request_size: body_bytes.len() as i64,
        client_ip,
        user_agent,
    };

    tracing::info!(
        request_id = %ctx.request_id,
        method = %method,
        path = %path,
        model = %ctx.model,
        "Proxying request"
    );

    let upstream = match forward::send(
        &state.http_client,
        &state.config.upstream.url,
        &method,
        &path,
        query.as_deref(),
        content_type,
        authorization,
        body_bytes,
    )
    .await
    {
        Ok(response) => response,
        Err(e) => {
            // An unreachable upstream still gets a log record, with null
            // usage and cost fields.
            if let Some(pool) = &state.db {
                spawn_log_write(
                    pool,
                    ctx.finish(StatusCode::BAD_GATEWAY.as_u16(), false, None, None),
                );
            }
            return Err(e);
        }
    };

    let status = upstream.status();
    let upstream_content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    if forward::is_event_stream(&upstream_content_type) {
        Ok(relay_streamed(
            state.db.clone(),
            ctx,
            upstream,
            status,
            &upstream_content_type,
        ))
    } else {
        relay_buffered(state.db.as_ref(), ctx, upstream, status, &upstream_content_type).await
    }
}

/// Relay a streamed (SSE) upstream response.
///
/// A pump task forwards each chunk to the client through an mpsc channel and
/// feeds a copy to the [`UsageObserver`]; observation is synchronous and
/// happens after the send, so byte delivery is never delayed by parsing.
/// When the stream ends (or the client disconnects) the task assembles the
/// log record from whatever was captured and writes it best-effort.
fn relay_streamed(
    db: Option<SqlitePool>,
    ctx: LogContext,
    upstream: reqwest::Response,
    status: StatusCode,
    content_type: &str,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(64);
    let mut upstream_body = upstream.bytes_stream();

    tokio::spawn(async move {
        let mut observer = UsageObserver::new();

        while let Some(chunk) = upstream_body.next().await {
            match chunk {
                Ok(bytes) => {
                    // Relay first; the clone is a cheap refcount bump.
                    let disconnected = tx.send(Ok(bytes.clone())).await.is_err();
                    observer.observe(&bytes);
                    if disconnected {
                        tracing::debug!(
                            request_id = %ctx.request_id,
                            "Client disconnected mid-stream, stopping relay"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        request_id = %ctx.request_id,
                        error = %e,
                        "Error streaming from upstream"
                    );
                    let _ = tx.send(Err(std::io::Error::other(e))).await;
                    break;
                }
            }
        }
        // Close the client stream before touching the database.
        drop(tx);

        let capture = observer.finish();
        let response_body = serde_json::json!({
            "streamed": true,
            "preview": capture.preview,
            "usage": capture.usage,
        });
        let record = ctx.finish(
            status.as_u16(),
            true,
            Some(response_body),
            capture.usage.as_ref(),
        );
        if let Some(pool) = db {
            record.write_best_effort(&pool).await;
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// Relay a buffered (non-streamed) upstream response.
///
/// The whole body is forwarded in one write. A non-JSON body is a valid
/// upstream response: it is logged as opaque text with no usage.
async fn relay_buffered(
    db: Option<&SqlitePool>,
    ctx: LogContext,
    upstream: reqwest::Response,
    status: StatusCode,
    content_type: &str,
) -> Result<Response, Error> {
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| Error::Internal(format!("Failed to read upstream response: {e}")))?;

    let response_value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    };

    let usage: Option<Usage> = response_value
        .get("usage")
        .filter(|u| !u.is_null())
        .and_then(|u| serde_json::from_value(u.clone()).ok());

    let record = ctx.finish(status.as_u16(), false, Some(response_value), usage.as_ref());
    if let Some(pool) = db {
        spawn_log_write(pool, record);
    }

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .map_err(|e| Error::Internal(e.to_string()))
}
