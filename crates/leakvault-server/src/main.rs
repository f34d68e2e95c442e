//! Leakvault Server - Main entry point

use anyhow::Result;
use axum::Router;
use leakvault_common::logging::{init_logging, LogConfig};
use leakvault_ingest::storage::PgStore;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use leakvault_server::{
    api::{self, AppState},
    config::Config,
    features::{
        agents::{AgentGate, PgAgentRepository},
        combolists::PgSubmissionRepository,
        FeatureState,
    },
    stream::{self, StreamContext, StreamLimits},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("leakvault-server")
        .filter_directives("leakvault_server=debug,leakvault_ingest=info,tower_http=debug,sqlx=warn")
        .build()
        // LOG_* variables take precedence over these defaults
        .apply_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Leakvault Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let gate = AgentGate::new(Arc::new(PgAgentRepository::new(db_pool.clone())));
    let shutdown = CancellationToken::new();

    // Agent stream listener
    let stream_handle = if config.stream.enabled {
        let store = Arc::new(PgStore::new(db_pool.clone()));
        let context = StreamContext {
            gate: gate.clone(),
            registry: store.clone(),
            entries: store,
            platform: config.agents.combolist_platform.clone(),
        };
        let listener = tokio::net::TcpListener::bind(config.stream.addr.as_str()).await?;
        let limits = StreamLimits::from(&config.stream);
        let token = shutdown.clone();

        Some(tokio::spawn(async move {
            if let Err(e) = stream::serve(listener, context, limits, token).await {
                error!(error = %e, "Agent stream listener failed");
            }
        }))
    } else {
        info!("Agent stream is disabled (AGENT_STREAM_ENABLED=false)");
        None
    };

    let state = AppState {
        features: FeatureState {
            gate,
            submissions: Arc::new(PgSubmissionRepository::new(db_pool.clone())),
            combolist_platform: config.agents.combolist_platform.clone(),
        },
        health: Arc::new(db_pool),
    };

    let app: Router = api::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(
        config.server.shutdown_timeout_secs,
        shutdown.clone(),
    ))
    .await?;

    shutdown.cancel();
    if let Some(handle) = stream_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Agent stream task panicked");
        }
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
///
/// Cancels `stream_shutdown` as soon as a signal arrives, then gives
/// in-flight HTTP requests the grace period.
async fn shutdown_signal(timeout_secs: u64, stream_shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    stream_shutdown.cancel();

    // Give ongoing requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
