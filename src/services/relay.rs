use bytes::Bytes;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::services::identity::IdentityResolver;
use crate::services::sse::SseAccumulator;
use crate::store::UsageLedger;
use crate::utils::error::{AppError, Result};

/// 中继服务配置
#[derive(Debug, Clone)]
pub struct ProxyRelayConfig {
    /// 未匹配到 profile 时的默认上游
    pub default_base_url: String,
    /// anthropic-version 默认值 (调用方未提供时使用)
    pub api_version: String,
    pub timeout_seconds: u64,
}

impl Default for ProxyRelayConfig {
    fn default() -> Self {
        Self {
            default_base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            timeout_seconds: 600, // 10 minutes for long-running requests
        }
    }
}

impl ProxyRelayConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_base_url: settings.upstream.base_url.clone(),
            api_version: settings.upstream.api_version.clone(),
            timeout_seconds: settings.upstream.timeout_seconds,
        }
    }
}

/// 非流式响应中的顶层 usage 对象
#[derive(Debug, Clone, Default, Deserialize)]
struct BufferedUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct BufferedResponse {
    usage: Option<BufferedUsage>,
}

/// 转发响应结果 (缓冲模式, 或上游错误状态的原样透传)
#[derive(Debug)]
pub struct RelayResponse {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// 流式转发结果
pub enum StreamRelay {
    /// 上游 2xx, 原始数据块经 channel 透传给调用方
    Stream(mpsc::Receiver<Result<Bytes>>),
    /// 上游非 2xx, 状态与 body 原样透传, 不做任何统计
    Passthrough(RelayResponse),
}

/// 请求解析结果: 上游目标 + 账本归属
#[derive(Debug)]
struct ResolvedTarget {
    base_url: String,
    forward_key: String,
    /// None 表示未归属身份, 本次用量丢弃
    profile_id: Option<String>,
    /// 账本 key: 请求 model 字段, 缺失时回退到 profile 默认模型
    model_key: Option<String>,
}

/// 反向代理中继服务
///
/// 每个请求: 解析身份 → 转发上游 → 透传响应 → 提交用量统计。
/// 账本锁只在提交时短暂持有, 不跨越流式阶段。
pub struct ProxyRelayService {
    config: ProxyRelayConfig,
    http_client: Arc<Client>,
    resolver: Arc<IdentityResolver>,
    ledger: Arc<UsageLedger>,
}

impl ProxyRelayService {
    pub fn new(
        config: ProxyRelayConfig,
        http_client: Arc<Client>,
        resolver: Arc<IdentityResolver>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            config,
            http_client,
            resolver,
            ledger,
        }
    }

    /// 解析入站凭证, 决定上游目标与用量归属
    async fn resolve_target(&self, credential: &str, payload: &JsonValue) -> Result<ResolvedTarget> {
        let request_model = payload
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match self.resolver.resolve(credential).await? {
            Some(profile) => Ok(ResolvedTarget {
                base_url: profile.base_url().to_string(),
                forward_key: profile.api_key.clone(),
                model_key: request_model
                    .or_else(|| Some(profile.model_name.clone()).filter(|m| !m.is_empty())),
                profile_id: Some(profile.id),
            }),
            None => Ok(ResolvedTarget {
                base_url: self.config.default_base_url.trim_end_matches('/').to_string(),
                forward_key: credential.to_string(),
                profile_id: None,
                model_key: request_model,
            }),
        }
    }

    /// 执行上游 HTTP 请求 (带超时)
    ///
    /// 请求体原样透传, 只替换凭证与协议版本头
    async fn send_upstream(
        &self,
        target: &ResolvedTarget,
        api_version: Option<&str>,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", target.base_url);
        let version = api_version.unwrap_or(&self.config.api_version);

        let request_builder = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("anthropic-version", version)
            .header("x-api-key", &target.forward_key)
            .body(body);

        timeout(
            Duration::from_secs(self.config.timeout_seconds),
            request_builder.send(),
        )
        .await
        .map_err(|_| AppError::UpstreamError("Upstream request timeout".to_string()))?
        .map_err(|e| {
            error!("HTTP request to upstream failed: {:?}", e);
            AppError::UpstreamError(format!("Failed to reach upstream: {}", e))
        })
    }

    /// 非流式转发
    ///
    /// 等待完整上游响应并原样透传; 2xx 且 body 含 usage 对象时,
    /// 在返回前提交一次账本更新 (未归属身份的用量直接丢弃)
    pub async fn relay_request(
        &self,
        credential: &str,
        api_version: Option<&str>,
        body: Bytes,
    ) -> Result<RelayResponse> {
        let payload: JsonValue = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
        let target = self.resolve_target(credential, &payload).await?;

        info!(
            "📤 Forwarding request to {} (attributed: {}, model: {})",
            target.base_url,
            target.profile_id.is_some(),
            target.model_key.as_deref().unwrap_or("unspecified")
        );

        let response = self.send_upstream(&target, api_version, body).await?;

        let status_code = response.status().as_u16();
        let content_type = extract_content_type(response.headers());
        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::UpstreamError(format!("Failed to read upstream body: {}", e)))?;

        // 非 2xx: 状态与 body 原样透传, 不做统计, 不重试
        if (200..300).contains(&status_code) {
            self.commit_buffered_usage(&target, &body_bytes).await;
        } else {
            warn!("Upstream returned status {}, relaying verbatim", status_code);
        }

        Ok(RelayResponse {
            status_code,
            content_type,
            body: body_bytes.to_vec(),
        })
    }

    /// 从缓冲响应体解析 usage 并提交账本
    ///
    /// 解析失败视作无 usage 响应; 账本写入失败只记日志,
    /// 不影响已经准备好的响应
    async fn commit_buffered_usage(&self, target: &ResolvedTarget, body: &[u8]) {
        let usage = match serde_json::from_slice::<BufferedResponse>(body) {
            Ok(parsed) => parsed.usage,
            Err(e) => {
                debug!("No recognizable usage in upstream response: {}", e);
                None
            }
        };

        let Some(usage) = usage else { return };

        let (Some(profile_id), Some(model_key)) = (&target.profile_id, &target.model_key) else {
            debug!("Usage discarded (unresolved identity or missing model)");
            return;
        };

        match self
            .ledger
            .update(profile_id, model_key, usage.input_tokens, usage.output_tokens)
            .await
        {
            Ok(record) => debug!(
                "Usage committed for ({}, {}): {} requests total",
                profile_id, model_key, record.request_count
            ),
            Err(e) => warn!("⚠️ Failed to record usage: {}", e),
        }
    }

    /// 流式转发 (SSE)
    ///
    /// 上游 2xx 时返回数据块 channel: 每个原始块立即转发,
    /// 同时喂给本请求独占的累加器; 上游流正常结束后一次性提交账本。
    /// 客户端中途断开则中止上游读取且不提交 (部分用量不可靠)。
    pub async fn relay_request_stream(
        &self,
        credential: &str,
        api_version: Option<&str>,
        body: Bytes,
    ) -> Result<StreamRelay> {
        let payload: JsonValue = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
        let target = self.resolve_target(credential, &payload).await?;

        info!(
            "📡 Forwarding stream request to {} (attributed: {}, model: {})",
            target.base_url,
            target.profile_id.is_some(),
            target.model_key.as_deref().unwrap_or("unspecified")
        );

        let response = self.send_upstream(&target, api_version, body).await?;
        let status = response.status();

        if !status.is_success() {
            let content_type = extract_content_type(response.headers());
            let body = response.bytes().await.unwrap_or_default();
            warn!(
                "Upstream returned status {} for stream request, relaying verbatim",
                status
            );
            return Ok(StreamRelay::Passthrough(RelayResponse {
                status_code: status.as_u16(),
                content_type,
                body: body.to_vec(),
            }));
        }

        let (tx, rx) = mpsc::channel::<Result<Bytes>>(100);
        let ledger = Arc::clone(&self.ledger);
        let profile_id = target.profile_id;
        let model_key = target.model_key;

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut accumulator = SseAccumulator::new();
            let mut clean_end = true;

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        // 先转发原始数据块, 统计解析不阻塞转发
                        if tx.send(Ok(chunk.clone())).await.is_err() {
                            debug!("Client disconnected, aborting upstream stream");
                            clean_end = false;
                            break;
                        }
                        accumulator.feed(&chunk);
                    }
                    Err(e) => {
                        error!("Error reading upstream stream chunk: {}", e);
                        let _ = tx
                            .send(Err(AppError::UpstreamError(e.to_string())))
                            .await;
                        clean_end = false;
                        break;
                    }
                }
            }

            // 只有传输层正常收尾才提交; 终止不依赖任何特定事件类型
            if !clean_end {
                return;
            }

            let (input_tokens, output_tokens) = accumulator.tally();
            match (profile_id, model_key) {
                (Some(profile_id), Some(model_key)) => {
                    info!(
                        "📊 Stream usage - Input: {}, Output: {}",
                        input_tokens, output_tokens
                    );
                    if let Err(e) = ledger
                        .update(&profile_id, &model_key, input_tokens, output_tokens)
                        .await
                    {
                        warn!("⚠️ Failed to record stream usage: {}", e);
                    }
                }
                _ => debug!("Stream usage discarded (unresolved identity or missing model)"),
            }
        });

        Ok(StreamRelay::Stream(rx))
    }
}

fn extract_content_type(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
