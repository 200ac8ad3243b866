//! Access log record types and database operations.

use sqlx::SqlitePool;

/// One completed proxy transaction, ready for database insertion.
///
/// Created once per request after the response finishes and never mutated;
/// ownership passes to the fire-and-forget writer. All fields are owned
/// types to satisfy the `tokio::spawn` `'static` requirement.
#[derive(Debug)]
pub struct RequestLog {
    pub request_id: String,
    pub timestamp: String,
    pub request_method: String,
    pub request_path: String,
    pub model: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cached_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub response_time_ms: i64,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub response_status: i64,
    pub upstream_url: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_size: i64,
    pub response_size: i64,
    pub streamed: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
}

impl RequestLog {
    /// Insert this log record into the database.
    pub async fn insert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO request_logs (
                request_id, timestamp, request_method, request_path, model,
                prompt_tokens, completion_tokens, total_tokens, cached_tokens,
                total_cost, response_time_ms, request_body, response_body,
                response_status, upstream_url, client_ip, user_agent,
                request_size, response_size, streamed, temperature, max_tokens
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.request_id)
        .bind(&self.timestamp)
        .bind(&self.request_method)
        .bind(&self.request_path)
        .bind(&self.model)
        .bind(self.prompt_tokens)
        .bind(self.completion_tokens)
        .bind(self.total_tokens)
        .bind(self.cached_tokens)
        .bind(self.total_cost)
        .bind(self.response_time_ms)
        .bind(self.request_body.as_deref())
        .bind(self.response_body.as_deref())
        .bind(self.response_status)
        .bind(&self.upstream_url)
        .bind(self.client_ip.as_deref())
        .bind(self.user_agent.as_deref())
        .bind(self.request_size)
        .bind(self.response_size)
        .bind(self.streamed)
        .bind(self.temperature)
        .bind(self.max_tokens)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Write this record, reporting failure only to the operational log.
    ///
    /// Persistence failures never affect the client-facing response and are
    /// never retried.
    pub async fn write_best_effort(&self, pool: &SqlitePool) {
        if let Err(e) = self.insert(pool).await {
            tracing::warn!(
                request_id = %self.request_id,
                error = %e,
                "Failed to write request log to database"
            );
        }
    }
}

/// Spawn a fire-and-forget database write.
///
/// The client response is never blocked on, or failed by, log persistence.
pub fn spawn_log_write(pool: &SqlitePool, log: RequestLog) {
    let pool = pool.clone();
    tokio::spawn(async move {
        log.write_best_effort(&pool).await;
    });
}
