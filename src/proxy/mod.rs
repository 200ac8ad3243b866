//! HTTP proxy server module.
//!
//! Accepts OpenAI-compatible requests, forwards them to the configured
//! upstream, relays the response, and accounts for token usage and cost.

pub mod forward;
pub mod gate;
mod handlers;
mod server;
pub mod stream;

pub use handlers::normalize_ip;
pub use server::{build_http_client, create_router, run_server, AppState};
pub use stream::{StreamCapture, UsageObserver, PREVIEW_CAP};
