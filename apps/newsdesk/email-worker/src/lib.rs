//! Email Worker Service
//!
//! Consumes the email queue and sends each notification batch over SMTP.
//!
//! ## Architecture
//!
//! ```text
//! Redis (jobs:email-queue:*)
//!   ↓ claim_next (Lua, atomic)
//! JobWorker (concurrency, retries with backoff, retention sweeps)
//!   ↓
//! NotificationDispatcher<SmtpProvider>
//!   ↓
//! SMTP relay
//! ```
//!
//! A health server exposes `/health`, `/ready`, `/metrics` and queue counts.

pub mod config;

pub use config::WorkerSettings;

use axum::Router;
use core_config::{redis::RedisConfig, Environment, FromEnv};
use domain_notifications::{EmailProvider, NotificationDispatcher, SmtpConfig, SmtpProvider};
use eyre::{Result, WrapErr};
use job_queue::{
    health_router, init_metrics, HandlerRegistry, HealthState, JobStore, JobWorker, RedisJobStore,
};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_INITIAL_DELAY: Duration = Duration::from_millis(200);

/// Connect to Redis, retrying with doubling delays while it comes up.
async fn connect_redis(config: &RedisConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.url()).wrap_err("Invalid Redis connection settings")?;

    let mut delay = CONNECT_INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match ConnectionManager::new(client.clone()).await {
            Ok(manager) => {
                info!(host = %config.host, port = config.port, "Connected to Redis");
                return Ok(manager);
            }
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %e, retry_in_ms = delay.as_millis() as u64, "Redis not reachable yet");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| {
                    format!("Failed to connect to Redis at {}:{}", config.host, config.port)
                });
            }
        }
    }
}

/// Register the notification dispatcher for `queue`.
pub fn build_registry<P: EmailProvider + 'static>(queue: &str, provider: P) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_processor_on(queue, Arc::new(NotificationDispatcher::new(provider)));
    registry
}

/// Start the health and metrics HTTP server
async fn start_health_server(state: HealthState, port: u16) -> Result<()> {
    let app: Router = health_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the email worker until SIGINT or SIGTERM.
///
/// In-flight jobs finish before this returns.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics();

    info!(name = APP_NAME, version = APP_VERSION, environment = ?environment, "Starting email worker");

    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker settings")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let smtp_config = SmtpConfig::from_env().wrap_err("Failed to load SMTP configuration")?;

    let redis = connect_redis(&redis_config).await?;
    let store: Arc<dyn JobStore> =
        Arc::new(RedisJobStore::new(redis).with_prefix(settings.key_prefix.clone()));

    let provider = SmtpProvider::new(smtp_config).wrap_err("Failed to create SMTP provider")?;
    match provider.health_check().await {
        Ok(_) => info!(provider = provider.name(), "Email provider reachable"),
        // Sends are retried per job, so an unreachable relay at startup is not fatal.
        Err(e) => warn!(provider = provider.name(), error = %e, "Email provider not reachable"),
    }

    let worker_config = settings.worker_config();
    info!(
        queue = %settings.queue,
        prefix = %settings.key_prefix,
        worker_id = %worker_config.worker_id,
        concurrency = worker_config.concurrency,
        poll_interval_ms = worker_config.poll_interval_ms,
        handler_timeout_ms = ?worker_config.handler_timeout_ms,
        max_attempts = settings.max_attempts,
        "Worker configuration loaded"
    );

    let registry = build_registry(&settings.queue, provider);
    let worker = JobWorker::new(store.clone(), registry, worker_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(store, APP_NAME, APP_VERSION);
    let health_port = settings.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = ?e, "Health server failed");
        }
    });

    worker.run(shutdown_rx).await.wrap_err("Email worker stopped with an error")?;

    info!("Email worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }
}
