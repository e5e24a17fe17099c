use anyhow::{Context, Result};
use dataport::activity::{ActivityLog, AuditSink};
use dataport::api::{create_destination_router, create_oauth_router, DestinationAppState, OAuthAppState};
use dataport::config::{apply_env_overrides, encryption_key_from_env, load_config};
use dataport::credentials::{Cipher, TokenStore};
use dataport::destination::{DestinationStore, LifecycleManager};
use dataport::export_log::ExportLogStore;
use dataport::oauth::OAuthBroker;
use dataport::validator::ConnectionValidator;
use export_manager::adapters::SpoolTransport;
use export_manager::api::{create_export_router, ExportAppState};
use export_manager::render::JsonDirectoryDataset;
use export_manager::{AdapterRegistry, ExportOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dataport=info,export_manager=info".into()),
        )
        .init();

    info!("Dataport server starting...");

    // Configuration: TOML file, then DATAPORT_* overrides
    let config_path =
        std::env::var("DATAPORT_CONFIG").unwrap_or_else(|_| "dataport.toml".to_string());
    let mut config = load_config(&config_path)?;
    apply_env_overrides(&mut config);

    let encryption_key = encryption_key_from_env()?;
    let cipher = Cipher::from_base64_key(encryption_key.expose())
        .context("Invalid DATAPORT_ENCRYPTION_KEY")?;

    info!(
        config_path = %config_path,
        bind_addr = %config.server.bind_addr,
        auth_enabled = config.server.auth_enabled,
        database_path = %config.storage.database_path,
        spool_dir = %config.exports.spool_dir,
        "Configuration loaded"
    );

    // Stores
    let db_path = &config.storage.database_path;
    let activity = Arc::new(ActivityLog::new(db_path).context("Failed to initialize activity log")?);
    let audit: Arc<dyn AuditSink> = activity;
    let destinations = Arc::new(
        DestinationStore::new(db_path, cipher.clone()).context("Failed to initialize destination store")?,
    );
    let tokens =
        Arc::new(TokenStore::new(db_path, cipher).context("Failed to initialize token store")?);
    let export_logs =
        Arc::new(ExportLogStore::new(db_path).context("Failed to initialize export log")?);
    info!("Stores initialized");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.exports.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    // Components
    let lifecycle = Arc::new(LifecycleManager::new(destinations, Arc::clone(&audit)));
    let validator = Arc::new(ConnectionValidator::new(
        Arc::clone(&lifecycle),
        Arc::clone(&tokens),
        Arc::clone(&audit),
    ));
    let broker = Arc::new(OAuthBroker::new(
        &config.oauth,
        Arc::clone(&tokens),
        Arc::clone(&audit),
        http_client.clone(),
    ));
    let registry = Arc::new(AdapterRegistry::with_defaults(
        tokens,
        http_client,
        &config.exports,
        Arc::new(SpoolTransport::new(&config.exports.spool_dir)),
    ));
    let orchestrator = Arc::new(ExportOrchestrator::new(
        Arc::clone(&lifecycle),
        export_logs,
        registry,
        Arc::new(JsonDirectoryDataset::new(&config.exports.dataset_dir)),
        audit,
    ));

    // HTTP API
    let auth_enabled = config.server.auth_enabled;
    let router = create_destination_router(DestinationAppState {
        lifecycle,
        validator,
        auth_enabled,
    })
    .merge(create_oauth_router(OAuthAppState {
        broker,
        auth_enabled,
    }))
    .merge(create_export_router(ExportAppState {
        orchestrator: Arc::clone(&orchestrator),
        auth_enabled,
    }))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Dataport API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    info!("Shutdown signal received, draining exports");

    // Graceful shutdown
    let report = orchestrator
        .shutdown(Duration::from_secs(config.exports.shutdown_timeout_secs))
        .await;
    info!(
        completed = report.completed,
        aborted = report.aborted,
        "Dataport server stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
    }
}
