//! Token 使用统计 API
//!
//! - GET    /usage      列出统计记录 (附带 profile 名称)
//! - POST   /usage      手动记录一次用量
//! - DELETE /usage/:id  删除单条记录
//! - DELETE /usage      清空所有记录
//!
//! 这些路由会被 nest 到 /api 前缀下。

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

use crate::store::{ProfileStore, UsageLedger};
use crate::utils::error::{AppError, Result};

/// 统计路由状态
#[derive(Clone)]
pub struct StatsState {
    pub profile_store: Arc<ProfileStore>,
    pub usage_ledger: Arc<UsageLedger>,
}

pub fn create_router(state: StatsState) -> Router {
    Router::new()
        .route("/usage", get(list_usage).post(record_usage).delete(clear_usage))
        .route("/usage/:id", delete(delete_usage))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordUsageRequest {
    profile_id: String,
    model_name: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// 列出所有记录，按 profileId 联结 profile 名称与地址
///
/// 记录可能指向已删除的方案，此时名称显示为 Unknown
async fn list_usage(State(state): State<StatsState>) -> Result<impl IntoResponse> {
    let records = state.usage_ledger.list().await?;
    let config = state.profile_store.snapshot().await?;

    let profiles: HashMap<&str, (&str, &str)> = config
        .profiles
        .iter()
        .map(|p| (p.id.as_str(), (p.name.as_str(), p.api_url.as_str())))
        .collect();

    let enriched: Vec<_> = records
        .iter()
        .map(|record| {
            let mut value = serde_json::to_value(record).unwrap_or_default();
            if let Some(obj) = value.as_object_mut() {
                match profiles.get(record.profile_id.as_str()) {
                    Some((name, api_url)) => {
                        obj.insert("profileName".to_string(), json!(name));
                        obj.insert("profileUrl".to_string(), json!(api_url));
                    }
                    None => {
                        obj.insert("profileName".to_string(), json!("Unknown"));
                        obj.insert("profileUrl".to_string(), JsonValue::Null);
                    }
                }
            }
            value
        })
        .collect();

    Ok(Json(json!({ "records": enriched })))
}

async fn record_usage(
    State(state): State<StatsState>,
    Json(request): Json<RecordUsageRequest>,
) -> Result<impl IntoResponse> {
    if request.profile_id.trim().is_empty() {
        return Err(AppError::ValidationError("profileId is required".to_string()));
    }
    if request.model_name.trim().is_empty() {
        return Err(AppError::ValidationError("modelName is required".to_string()));
    }

    let record = state
        .usage_ledger
        .update(
            &request.profile_id,
            &request.model_name,
            request.input_tokens,
            request.output_tokens,
        )
        .await?;
    Ok(Json(record))
}

async fn delete_usage(
    State(state): State<StatsState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.usage_ledger.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn clear_usage(State(state): State<StatsState>) -> Result<impl IntoResponse> {
    state.usage_ledger.clear().await?;
    Ok(Json(json!({ "success": true })))
}
