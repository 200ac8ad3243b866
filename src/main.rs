//! tollgate - Transparent metering proxy for OpenAI-compatible LLM APIs
//!
//! Forwards requests to a configured upstream, relays streaming responses in
//! real time, and logs per-request token usage and cost to SQLite.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::config::Config;
use tollgate::proxy::run_server;
use tollgate::storage::init_pool;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Transparent metering proxy for OpenAI-compatible LLM APIs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let mut config = Config::from_file(&config)?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            let db = match &config.database {
                Some(database) => {
                    let pool = init_pool(&database.path).await?;
                    tracing::info!(path = %database.path, "Request logging enabled");
                    Some(pool)
                }
                None => None,
            };

            run_server(config, db).await
        }

        Commands::Check { config } => {
            let path = config;
            match Config::from_file(&path) {
                Ok(config) => {
                    tracing::info!(
                        upstream = %config.upstream.url,
                        listen = %config.server.listen,
                        priced_models = config.pricing.models.len(),
                        "Configuration is valid"
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(config = %path, error = %e, "Configuration is invalid");
                    Err(e.into())
                }
            }
        }
    }
}
