//! 配置方案管理 API
//!
//! - GET    /profiles               列出所有方案
//! - POST   /profiles               创建方案
//! - PUT    /profiles/:id           更新方案
//! - DELETE /profiles/:id           删除方案
//! - POST   /profiles/:id/activate  设置激活方案
//!
//! 这些路由会被 nest 到 /api 前缀下。

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::models::{CreateProfileOptions, UpdateProfileOptions};
use crate::store::ProfileStore;
use crate::utils::error::{AppError, Result};

/// 管理路由状态
#[derive(Clone)]
pub struct AdminState {
    pub profile_store: Arc<ProfileStore>,
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/profiles", get(list_profiles).post(create_profile))
        .route("/profiles/:id", put(update_profile).delete(delete_profile))
        .route("/profiles/:id/activate", post(activate_profile))
        .with_state(state)
}

async fn list_profiles(State(state): State<AdminState>) -> Result<impl IntoResponse> {
    let config = state.profile_store.snapshot().await?;
    Ok(Json(json!({
        "profiles": config.profiles,
        "activeProfile": config.active_profile,
    })))
}

async fn create_profile(
    State(state): State<AdminState>,
    Json(options): Json<CreateProfileOptions>,
) -> Result<impl IntoResponse> {
    validate_fields(&options.name, &options.api_url, &options.api_key)?;
    let profile = state.profile_store.create(options).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn update_profile(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(options): Json<UpdateProfileOptions>,
) -> Result<impl IntoResponse> {
    validate_fields(&options.name, &options.api_url, &options.api_key)?;
    let profile = state.profile_store.update(&id, options).await?;
    Ok(Json(profile))
}

async fn activate_profile(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let profile = state.profile_store.activate(&id).await?;
    Ok(Json(json!({ "success": true, "activeProfile": profile.id })))
}

async fn delete_profile(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.profile_store.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

/// 必填字段校验 (modelName 允许为空，转发时回退到请求自带的 model)
fn validate_fields(name: &str, api_url: &str, api_key: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::ValidationError("Profile name is required".to_string()));
    }
    if api_url.trim().is_empty() {
        return Err(AppError::ValidationError("API URL is required".to_string()));
    }
    if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
        return Err(AppError::ValidationError(
            "API URL must start with http:// or https://".to_string(),
        ));
    }
    if api_key.trim().is_empty() {
        return Err(AppError::ValidationError("API key is required".to_string()));
    }
    Ok(())
}
