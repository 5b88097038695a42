mod config;
mod context;
mod credential;
mod relation;
mod primitives;
mod gate;
mod state;
mod lifecycle;
mod agent;
mod api;
#[cfg(test)]
mod testing;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::agent::AgentHandle;
use crate::config::Config;
use crate::credential::CephAuthCli;
use crate::lifecycle::ServiceLifecycleManager;
use crate::primitives::Capabilities;
use crate::relation::source::{DirRelationPublisher, DirRelationSource};
use crate::state::db::StateDb;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relation_agentd=info"))
        )
        .init();

    tracing::info!("Starting relation-agentd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/relation-agent/agentd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!(
        "Loaded config from {} ({} managed services)",
        config_path,
        config.services.len()
    );

    let unit = config.unit_id()?;
    tracing::info!("Running as unit {}", unit);

    // Open state database
    let db = StateDb::open(&config.agent.db_path)?;
    tracing::info!("Opened database at {:?}", config.agent.db_path);

    let manager = ServiceLifecycleManager::new(
        config.services.clone(),
        config.options.clone(),
        unit,
        db,
        Box::new(DirRelationSource::new(&config.relations.data_dir)),
        Box::new(DirRelationPublisher::new(&config.relations.outputs_dir)),
        Box::new(CephAuthCli::new()),
        Capabilities::host(&config.agent.template_dir),
    );

    // Start evaluation thread
    let agent = AgentHandle::spawn(manager);

    let (hash_tx, hash_rx) = watch::channel(String::new());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn agent event loop
    let loop_cancel = cancel.clone();
    let loop_agent = agent.clone();
    let loop_config = config.relations.clone();
    let loop_handle = tokio::spawn(async move {
        if let Err(e) = agent::run(loop_agent, loop_config, hash_tx, loop_cancel).await {
            tracing::error!("Agent loop error: {}", e);
        }
    });

    // Build API router
    let app_state = api::routes::AppState {
        agent: agent.clone(),
        hash_rx,
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(loop_handle, server_handle);

    // Shutdown evaluation thread
    if let Err(e) = agent.shutdown().await {
        tracing::error!("Failed to shutdown agent: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
