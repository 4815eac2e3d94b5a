//! Claude Profile Relay
//!
//! 单端点流式反向代理: 按入站凭证匹配配置方案 (profile)，
//! 将 /v1/messages 请求原样转发到对应上游，透传响应的同时
//! 增量解析 SSE 事件，把 token 使用量记入按 (profile, model)
//! 聚合的 JSON 账本。

pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Settings;
pub use services::{ProxyRelayConfig, ProxyRelayService};
pub use store::{ProfileStore, UsageLedger};
pub use utils::error::{AppError, Result};
