use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{ProfileStore, UsageLedger};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub profile_store: Arc<ProfileStore>,
    pub usage_ledger: Arc<UsageLedger>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub components: HealthComponents,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthComponents {
    pub profile_store: ComponentStatus,
    pub usage_ledger: ComponentStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    pub message: Option<String>,
}

/// Health check handler
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    // Both stores are file-backed; a load verifies the file is readable and parseable
    let profile_status = match state.profile_store.snapshot().await {
        Ok(_) => ComponentStatus {
            status: "healthy".to_string(),
            message: None,
        },
        Err(e) => ComponentStatus {
            status: "unhealthy".to_string(),
            message: Some(format!("Profile store load failed: {}", e)),
        },
    };

    let ledger_status = match state.usage_ledger.list().await {
        Ok(_) => ComponentStatus {
            status: "healthy".to_string(),
            message: None,
        },
        Err(e) => ComponentStatus {
            status: "unhealthy".to_string(),
            message: Some(format!("Usage ledger load failed: {}", e)),
        },
    };

    let overall_status = if profile_status.status == "healthy" && ledger_status.status == "healthy"
    {
        "healthy"
    } else {
        "degraded"
    };

    let status_code = if overall_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        components: HealthComponents {
            profile_store: profile_status,
            usage_ledger: ledger_status,
        },
    };

    (status_code, Json(response))
}

/// Simple ping handler
pub async fn ping() -> &'static str {
    "pong"
}
