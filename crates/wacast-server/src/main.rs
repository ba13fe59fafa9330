//! Wacast - WhatsApp campaign service entry point

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wacast_api::{create_router, AppState};
use wacast_common::config::{Config, LoggingConfig};
use wacast_core::campaign::{CampaignManager, CampaignRegistry, WorkerContext};
use wacast_core::{CrmClient, CrmService, GatewayClient, SettingsService};
use wacast_storage::{
    CampaignRepository, DatabasePool, DbCampaignRepository, DbSettingsRepository,
    InMemoryCampaignRepository, InMemorySettingsRepository, LocalStorage, MediaStorage,
    SettingsRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_logging(&config.logging);

    info!("Starting Wacast...");

    let (campaign_repo, settings_repo) = init_repositories(&config).await?;

    let media = MediaStorage::new(Arc::new(LocalStorage::new(&config.storage)?));

    let settings = Arc::new(SettingsService::new(
        settings_repo,
        &config.settings,
        &config.gateway,
    ));
    let gateway = GatewayClient::new(&config.gateway)?;
    let crm = CrmService::new(CrmClient::new(&config.crm)?, settings.clone(), &config.settings);

    let ctx = WorkerContext {
        repo: campaign_repo.clone(),
        settings: settings.clone(),
        gateway: gateway.clone(),
        media,
        registry: Arc::new(CampaignRegistry::new()),
        config: config.worker.clone(),
    };
    let campaigns = Arc::new(CampaignManager::new(ctx, crm.clone()));

    let resumed = campaigns.resume_started().await?;
    if !resumed.is_empty() {
        info!(campaigns = ?resumed, "Resumed campaigns interrupted by the last shutdown");
    }

    let state = Arc::new(AppState {
        campaigns: campaigns.clone(),
        campaign_repo,
        settings,
        gateway,
        crm,
        max_upload_bytes: config.server.max_upload_bytes,
    });
    let app = create_router(state);

    let addr = config.server.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting API server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Running campaigns stay `started` and resume on the next start
    let running = campaigns.active();
    if !running.is_empty() {
        warn!(campaigns = ?running, "Stopping running campaign workers");
    }
    campaigns.abort_all();

    info!("Wacast shutdown complete");

    Ok(())
}

async fn init_repositories(
    config: &Config,
) -> Result<(Arc<dyn CampaignRepository>, Arc<dyn SettingsRepository>)> {
    if config.database.is_memory() {
        warn!("Using in-memory storage; campaigns are lost on restart");
        return Ok((
            Arc::new(InMemoryCampaignRepository::new()),
            Arc::new(InMemorySettingsRepository::new()),
        ));
    }

    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    db_pool.migrate().await?;
    info!("Database migrations completed");

    Ok((
        Arc::new(DbCampaignRepository::new(db_pool.clone())),
        Arc::new(DbSettingsRepository::new(db_pool)),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(logging: &LoggingConfig) {
    let default_directives = if logging.level == "info" {
        "info,wacast=debug".to_string()
    } else {
        logging.level.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
