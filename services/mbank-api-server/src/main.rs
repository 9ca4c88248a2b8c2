//! mbank API Server
//!
//! Serves the authentication core of the mbank mobile backend: signed
//! request validation, OTP step-up over email, SMS and WhatsApp, single-use
//! access grants, token refresh and logout.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings
//! mbank-api-server
//!
//! # Start with custom config
//! mbank-api-server --config /path/to/config.toml
//!
//! # Start with environment overrides
//! MBANK__SERVER__PORT=8080 mbank-api-server
//! ```

mod config;
mod mailer;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mbank_auth::{AuthConfig, AuthService};
use mbank_db::{Database, DatabaseConfig as DbConfig};

use crate::config::{DatabaseSettings, LoggingConfig, ServerConfig};
use crate::mailer::TracingMailer;
use crate::routes::{create_router, AppState};

// =============================================================================
// CLI Arguments
// =============================================================================

/// mbank API Server - mobile banking authentication core
#[derive(Parser, Debug)]
#[command(name = "mbank-api-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "MBANK_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "MBANK_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MBANK_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MBANK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "MBANK_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
}

impl Args {
    /// Apply CLI overrides on top of the loaded configuration
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(url) = self.database_url {
            config.database.postgres_url = url;
        }
        if let Some(url) = self.redis_url {
            config.database.redis_url = url;
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    let config_path = args.config.clone();
    args.apply(&mut server_config);

    init_logging(&server_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = config_path.as_deref().unwrap_or("<none>"),
        "Starting mbank API Server"
    );

    fill_keys_from_env(&mut server_config.auth)?;
    validate_config(&server_config)?;

    let db = init_database(&server_config.database).await?;

    let auth = AuthService::with_default_channels(
        server_config.auth.clone(),
        db.stores(),
        Arc::new(TracingMailer),
    )?;
    tracing::info!("Authentication service initialized");

    let _cleanup = auth.rate_limiter.spawn_cleanup();
    let _purge = spawn_revocation_purge(auth.clone(), server_config.server.purge_interval());

    let state = AppState {
        auth,
        db: Some(db),
    };
    let app = create_router(state, &server_config.server);

    let addr = server_config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!(
        host = %server_config.server.host,
        port = %server_config.server.port,
        "Server listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(server_config.server.shutdown_timeout()))
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => subscriber
            .with(fmt::layer().json().with_target(true))
            .try_init()?,
        _ => subscriber
            .with(fmt::layer().pretty().with_target(true))
            .try_init()?,
    }

    Ok(())
}

/// Key material usually arrives as PEM files rather than config entries
fn fill_keys_from_env(auth: &mut AuthConfig) -> anyhow::Result<()> {
    let jwt = &auth.jwt;
    let missing = [
        &jwt.access_private_key_pem,
        &jwt.access_public_key_pem,
        &jwt.refresh_private_key_pem,
        &jwt.refresh_public_key_pem,
    ]
    .iter()
    .any(|pem| pem.trim().is_empty());
    if !missing {
        return Ok(());
    }

    let from_env = AuthConfig::from_env()?;
    auth.jwt.access_private_key_pem = from_env.jwt.access_private_key_pem;
    auth.jwt.access_public_key_pem = from_env.jwt.access_public_key_pem;
    auth.jwt.refresh_private_key_pem = from_env.jwt.refresh_private_key_pem;
    auth.jwt.refresh_public_key_pem = from_env.jwt.refresh_public_key_pem;
    Ok(())
}

/// Validate configuration
fn validate_config(config: &ServerConfig) -> anyhow::Result<()> {
    if let Err(errors) = config.auth.validate() {
        anyhow::bail!("invalid auth configuration: {}", errors.join("; "));
    }

    if config.auth.verihubs.app_id.is_empty() || config.auth.verihubs.api_key.is_empty() {
        tracing::warn!("Verihubs credentials not set, SMS and WhatsApp OTPs will fail");
    }

    if !config.auth.rate_limit.enabled {
        tracing::warn!("Rate limiting is disabled");
    }

    Ok(())
}

/// Initialize database connection
async fn init_database(settings: &DatabaseSettings) -> anyhow::Result<Arc<Database>> {
    tracing::info!("Connecting to database...");

    let db_config = DbConfig::from(settings);
    let db = Database::connect(&db_config).await?;

    if settings.run_migrations {
        db.migrate().await?;
    }

    let health = db.health_check().await;
    if !health.healthy {
        anyhow::bail!(
            "database health check failed (postgres: {}, redis: {})",
            health.postgres,
            health.redis
        );
    }

    tracing::info!(
        postgres = health.postgres,
        redis = health.redis,
        "Database health check passed"
    );

    Ok(Arc::new(db))
}

/// Periodically drop revocation ledger rows whose expiry has passed
fn spawn_revocation_purge(auth: AuthService, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = auth.purge_revoked(chrono::Utc::now()).await {
                tracing::warn!(error = %e, "revocation purge failed");
            }
        }
    })
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    tracing::info!(
        timeout_secs = timeout.as_secs(),
        "Waiting for in-flight requests to complete..."
    );

    tokio::time::sleep(timeout).await;
}

// =============================================================================
// Tests
// =============================================================================
