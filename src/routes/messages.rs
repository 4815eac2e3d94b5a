//! 代理端点: POST /v1/messages
//!
//! 请求体原样转发到上游，响应原样透传给客户端；
//! 流式与非流式的分派取决于请求体中的 stream 字段。

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use futures::stream::StreamExt;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::services::{ProxyRelayService, RelayResponse, StreamRelay};
use crate::utils::error::{AppError, Result};

/// 代理路由状态
#[derive(Clone)]
pub struct ProxyState {
    pub relay_service: Arc<ProxyRelayService>,
}

pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        .route("/v1/messages", post(handle_messages))
        .with_state(state)
}

/// 主转发端点
async fn handle_messages(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    // 1. 提取转发凭证 (缺失即拒绝，不做任何上游调用)
    let credential = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("Missing API key".to_string()))?;

    let api_version = headers
        .get("anthropic-version")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // 2. 解析 stream 标志 (请求体本身保持原样转发)
    let payload: JsonValue = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
    let stream = payload
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if stream {
        info!("🌊 Processing streaming request");
        match state
            .relay_service
            .relay_request_stream(&credential, api_version.as_deref(), body)
            .await?
        {
            StreamRelay::Stream(rx) => {
                let sse_stream = ReceiverStream::new(rx).map(|chunk_result| match chunk_result {
                    Ok(chunk) => Ok::<_, std::convert::Infallible>(chunk),
                    Err(e) => {
                        // 错误以 SSE 事件形式写入流，状态行已经发出无法更改
                        Ok(format!(
                            "event: error\ndata: {}\n\n",
                            serde_json::json!({"error": e.to_string()})
                        )
                        .into())
                    }
                });

                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/event-stream")
                    .header("Cache-Control", "no-cache")
                    .header("Connection", "keep-alive")
                    .header("X-Accel-Buffering", "no")
                    .body(Body::from_stream(sse_stream))
                    .map_err(|e| AppError::InternalError(e.to_string()))?)
            }
            StreamRelay::Passthrough(relay_response) => Ok(relay_to_response(relay_response)?),
        }
    } else {
        let relay_response = state
            .relay_service
            .relay_request(&credential, api_version.as_deref(), body)
            .await?;
        Ok(relay_to_response(relay_response)?)
    }
}

/// 上游响应原样透传: 状态码 + Content-Type + body
fn relay_to_response(relay: RelayResponse) -> Result<Response> {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(relay.status_code)
            .map_err(|_| AppError::InternalError(format!("Invalid status code {}", relay.status_code)))?,
    );
    if let Some(content_type) = relay.content_type {
        builder = builder.header("Content-Type", content_type);
    }
    builder
        .body(Body::from(relay.body))
        .map_err(|e| AppError::InternalError(e.to_string()))
}
