use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::{error, info};

use claude_profile_relay::routes::{
    health::{health_check, ping},
    messages, profiles, stats, AdminState, AppState, ProxyState, StatsState,
};
use claude_profile_relay::services::{IdentityResolver, ProxyRelayConfig, ProxyRelayService};
use claude_profile_relay::store::{ProfileStore, UsageLedger};
use claude_profile_relay::utils::{init_logger, HttpClient};
use claude_profile_relay::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file from project root (../.env) or current directory (.env)
    dotenvy::from_path("../.env")
        .or_else(|_| dotenvy::from_path(".env"))
        .ok(); // Ignore error if .env doesn't exist, rely on environment variables

    // Load configuration first (needed for logger initialization)
    let settings = Settings::new()?;

    // Initialize logging system
    init_logger(&settings)?;

    info!("🚀 Claude Profile Relay starting...");
    info!("📋 Configuration loaded");

    // Validate configuration
    if let Err(e) = settings.validate() {
        error!("❌ Configuration validation failed: {}", e);
        return Err(anyhow::anyhow!("Invalid configuration: {}", e));
    }
    info!("✅ Configuration validated");

    // Initialize HTTP client
    let http_client = HttpClient::new(&settings)?;
    info!("🌐 HTTP client initialized");

    // Initialize file-backed stores
    let profile_store = Arc::new(ProfileStore::new(&settings.storage.profile_file));
    let usage_ledger = Arc::new(UsageLedger::new(&settings.storage.usage_file));
    info!(
        "💾 Stores initialized (profiles: {}, usage: {})",
        settings.storage.profile_file, settings.storage.usage_file
    );

    // Initialize relay service
    let resolver = Arc::new(IdentityResolver::new(profile_store.clone()));
    let relay_service = Arc::new(ProxyRelayService::new(
        ProxyRelayConfig::from_settings(&settings),
        Arc::new(http_client.client().clone()),
        resolver,
        usage_ledger.clone(),
    ));
    info!("🔄 Relay service initialized");

    // Create shared application states
    let health_state = Arc::new(AppState {
        profile_store: profile_store.clone(),
        usage_ledger: usage_ledger.clone(),
    });

    let proxy_state = ProxyState { relay_service };

    let admin_state = AdminState {
        profile_store: profile_store.clone(),
    };

    let stats_state = StatsState {
        profile_store,
        usage_ledger,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ping", get(ping))
        .with_state(health_state)
        .merge(messages::create_router(proxy_state))
        .nest("/api", profiles::create_router(admin_state))
        .nest("/api", stats::create_router(stats_state));

    // Get bind address
    let bind_addr = settings.bind_address();

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("🚀 Server ready on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("👋 Shutting down...");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Signal received, starting graceful shutdown");
}
