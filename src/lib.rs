//! tollgate - Transparent metering proxy for OpenAI-compatible LLM APIs
//!
//! A reverse proxy that forwards chat/completion requests to an upstream,
//! relays streaming responses chunk-by-chunk, extracts token usage, converts
//! it to cost under a per-model pricing table, and persists one access-log
//! record per request.

pub mod config;
pub mod cost;
pub mod error;
pub mod proxy;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
