// Main entry point for the Triagedeck API server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::common::cursor::CursorCodec;
use server_core::common::id::SystemClock;
use server_core::domains::exports::worker::ExportWorker;
use server_core::kernel::{
    FsArtifactStore, PgIdentityProvider, PgStore, PublicUrlResolver, ServerKernel, Settings,
    SignedUrlResolver, StorageResolver,
};
use server_core::server::build_app;
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Triagedeck API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Wire the kernel
    let resolver: Arc<dyn StorageResolver> =
        match (&config.media_base_url, &config.media_url_secret) {
            (Some(base), Some(secret)) => {
                Arc::new(SignedUrlResolver::new(base.clone(), secret.as_bytes().to_vec()))
            }
            _ => Arc::new(PublicUrlResolver),
        };
    let kernel = Arc::new(ServerKernel::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(PgIdentityProvider::new(pool.clone())),
        resolver,
        Arc::new(FsArtifactStore::new(&config.artifact_dir)),
        Arc::new(SystemClock::new()),
        CursorCodec::new(config.cursor_secret.as_bytes().to_vec()),
        Settings {
            skew_window_ms: config.skew_window_ms,
            ..Settings::default()
        },
    ));

    // Start the export worker pool and the expiry sweeper
    let shutdown = CancellationToken::new();
    let worker = Arc::new(ExportWorker::new(
        kernel.store.clone(),
        kernel.artifacts.clone(),
        kernel.clock.clone(),
    ));
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));
    let _scheduler = server_core::kernel::sweeper::start_sweeper(kernel.clone())
        .await
        .context("Failed to start expiry sweeper")?;

    // Build application
    let app = build_app(kernel);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await
    .context("Server error")?;

    // Drain in-flight exports before exiting
    shutdown.cancel();
    let _ = worker_handle.await;

    Ok(())
}
