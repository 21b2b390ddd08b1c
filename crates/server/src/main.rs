use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::{
    load_config, validate_config, CancellationRegistry, Catalog, CredentialCache,
    HttpCatalogClient, HttpTransferClient, JobPool, OrchestratorConfig, PoolConfig,
    RecoveryLoader, TransferOrchestrator, TransferService, WorkerContext,
};
use ferry_server::api::create_router;
use ferry_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("FERRY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Catalog: {}", config.catalog.url);
    info!(
        "Facilities: {:?}",
        config.facilities.keys().collect::<Vec<_>>()
    );

    // External services
    let catalog: Arc<dyn Catalog> = Arc::new(
        HttpCatalogClient::new(&config.catalog).context("Failed to create catalog client")?,
    );
    let transfer: Arc<dyn TransferService> = Arc::new(
        HttpTransferClient::new(config.transfer.clone())
            .context("Failed to create transfer client")?,
    );

    // Service identity: a bad account stops start-up here
    let credentials = Arc::new(
        CredentialCache::login(
            Arc::clone(&catalog),
            config.service_user.username.clone(),
            config.service_user.password.clone(),
        )
        .await
        .context("Service user login failed")?,
    );

    let registry = Arc::new(CancellationRegistry::new(
        Arc::clone(&catalog),
        Arc::clone(&credentials),
    ));

    // Job pool
    let pool_config = PoolConfig::from(&config.pool);
    info!(
        "Job pool: max_concurrency={}, queue_capacity={}, poll_interval={:?}",
        pool_config.max_concurrency, pool_config.queue_capacity, pool_config.poll_interval
    );
    let pool = JobPool::new(
        pool_config,
        WorkerContext {
            catalog: Arc::clone(&catalog),
            transfer: Arc::clone(&transfer),
            credentials: Arc::clone(&credentials),
            registry: Arc::clone(&registry),
        },
    );

    // Re-adopt jobs a previous run left unfinished
    let report = RecoveryLoader::new(Arc::clone(&catalog), Arc::clone(&credentials))
        .resume(&pool)
        .await
        .context("Failed to recover unfinished jobs")?;
    if !report.skipped.is_empty() {
        warn!("{} unfinished jobs could not be resumed", report.skipped.len());
    }
    info!("Resumed {} unfinished jobs", report.resumed.len());

    // Orchestrator
    let orchestrator_config =
        OrchestratorConfig::from_config(&config).context("Invalid templates")?;
    let orchestrator = Arc::new(TransferOrchestrator::new(
        orchestrator_config,
        Arc::clone(&catalog),
        transfer,
        credentials,
        registry,
        pool.clone(),
    ));

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), catalog, orchestrator));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Running workers are abandoned; their jobs stay unfinished in the
    // catalog and are resumed on the next start.
    info!("Server shutting down...");
    pool.shutdown();

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}
