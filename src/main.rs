//! Library Server
//!
//! Book lending REST API server with a background job runtime.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use library_server::{
    api,
    config::{AppConfig, LoggingConfig},
    jobs::{queue::JobQueue, scheduler, worker::WorkerPool},
    repository::Repository,
    services::{redis::RedisService, Services},
    AppState,
};

/// Install the global subscriber. The returned guard flushes the log file on drop.
fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("library_server={},tower_http=debug", config.level).into());

    let json = config.format.eq_ignore_ascii_case("json");
    let stdout_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (file_layer, guard) = match config.directory.as_deref() {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "library-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging);

    tracing::info!("Starting Library Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    let redis_service = RedisService::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    tracing::info!("Connected to Redis");

    let repository = Repository::new(pool);
    let services = Arc::new(
        Services::from_config(repository, &config, redis_service.clone())
            .context("Failed to build services")?,
    );

    services
        .users
        .bootstrap_admin()
        .await
        .context("Failed to create bootstrap admin")?;

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let state = AppState {
        config: Arc::new(config),
        services: services.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if state.config.jobs.enabled {
        let jobs = state.config.jobs.clone();
        let queue = JobQueue::new(redis_service, &jobs.queue_prefix);

        let recovered = queue
            .recover_orphans()
            .await
            .context("Failed to recover orphaned jobs")?;
        if recovered > 0 {
            tracing::warn!(recovered, "Re-queued jobs left unacknowledged by a previous run");
        }
        match queue.dead_count().await {
            Ok(0) => {}
            Ok(dead) => tracing::warn!(dead, "Dead-letter list is not empty"),
            Err(e) => tracing::warn!(error = %e, "Could not inspect dead-letter list"),
        }

        background.extend(
            WorkerPool::new(queue.clone(), services.clone(), jobs.clone()).spawn(shutdown_rx.clone()),
        );
        background.push(tokio::spawn(scheduler::run(queue, jobs.clone(), shutdown_rx.clone())));

        tracing::info!(workers = jobs.workers, "Job runtime started");
    } else {
        tracing::info!("Background jobs disabled");
    }

    let app = api::router(state).context("Failed to build router")?;

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Let workers finish the job they hold
    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("Background task panicked: {}", e);
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
