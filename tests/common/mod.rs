//! 集成测试共享工具
//!
//! 提供基于临时目录的存储上下文和进程内伪上游服务器，
//! 使代理链路测试无需真实网络。
#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use claude_profile_relay::models::{CreateProfileOptions, Profile};
use claude_profile_relay::routes::{messages, profiles, stats, AdminState, ProxyState, StatsState};
use claude_profile_relay::services::{IdentityResolver, ProxyRelayConfig, ProxyRelayService};
use claude_profile_relay::store::{ProfileStore, UsageLedger};

/// 测试上下文: 临时目录里的两个 JSON 存储
pub struct TestContext {
    pub dir: TempDir,
    pub profile_store: Arc<ProfileStore>,
    pub usage_ledger: Arc<UsageLedger>,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let profile_store = Arc::new(ProfileStore::new(dir.path().join("config.json")));
        let usage_ledger = Arc::new(UsageLedger::new(dir.path().join("token-stats.json")));
        Self {
            dir,
            profile_store,
            usage_ledger,
        }
    }

    /// 代理路由 (POST /v1/messages)，默认上游指向给定地址
    pub fn proxy_router(&self, default_base_url: &str) -> Router {
        let resolver = Arc::new(IdentityResolver::new(self.profile_store.clone()));
        let relay_service = Arc::new(ProxyRelayService::new(
            ProxyRelayConfig {
                default_base_url: default_base_url.to_string(),
                api_version: "2023-06-01".to_string(),
                timeout_seconds: 30,
            },
            Arc::new(reqwest::Client::new()),
            resolver,
            self.usage_ledger.clone(),
        ));
        messages::create_router(ProxyState { relay_service })
    }

    /// 管理路由 (nest 到 /api 前缀下)
    pub fn admin_router(&self) -> Router {
        Router::new().nest(
            "/api",
            profiles::create_router(AdminState {
                profile_store: self.profile_store.clone(),
            }),
        )
    }

    /// 统计路由 (nest 到 /api 前缀下)
    pub fn stats_router(&self) -> Router {
        Router::new().nest(
            "/api",
            stats::create_router(StatsState {
                profile_store: self.profile_store.clone(),
                usage_ledger: self.usage_ledger.clone(),
            }),
        )
    }

    pub async fn create_profile(&self, name: &str, api_key: &str, api_url: &str) -> Profile {
        self.profile_store
            .create(CreateProfileOptions {
                name: name.to_string(),
                api_url: api_url.to_string(),
                api_key: api_key.to_string(),
                model_name: "claude-3-5-sonnet-20241022".to_string(),
            })
            .await
            .expect("Failed to create profile")
    }
}

/// 启动进程内伪上游，对 POST /v1/messages 返回固定响应
///
/// 返回可直接用作 profile apiUrl 的 http://127.0.0.1:PORT 地址
pub async fn spawn_upstream(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> String {
    let app = Router::new().route(
        "/v1/messages",
        post(move || async move { (status, [(header::CONTENT_TYPE, content_type)], body) }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake upstream");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Fake upstream failed");
    });

    format!("http://{}", addr)
}

/// 启动慢速 SSE 伪上游: 先发 message_start, 然后每隔 50ms 发一个 delta 帧
///
/// 用于模拟长时间运行的流，便于测试客户端中途断开
pub async fn spawn_slow_sse_upstream() -> String {
    async fn slow_stream() -> impl IntoResponse {
        let chunks = stream::unfold(0u32, |i| async move {
            if i == 0 {
                let frame = "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":50}}}\n\n";
                Some((Ok::<_, std::io::Error>(Bytes::from(frame)), 1))
            } else if i < 100 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let frame = "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":1}}\n\n";
                Some((Ok(Bytes::from(frame)), i + 1))
            } else {
                None
            }
        });
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(chunks),
        )
    }

    let app = Router::new().route("/v1/messages", post(slow_stream));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake upstream");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Fake upstream failed");
    });

    format!("http://{}", addr)
}
