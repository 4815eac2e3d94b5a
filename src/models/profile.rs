use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 配置方案: 一个上游 API 目标 (地址 + 转发凭证 + 默认模型)
///
/// 字段名与磁盘上 config.json 的 camelCase 格式保持一致
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
    pub created_at: String,
}

impl Profile {
    pub fn new(options: CreateProfileOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: options.name,
            api_url: options.api_url,
            api_key: options.api_key,
            model_name: options.model_name,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// 上游基础地址 (去除末尾斜杠)
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

/// 磁盘上的 profile 配置文件结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub active_profile: Option<String>,
}

/// 创建配置方案的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileOptions {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
}

/// 更新配置方案的参数 (id 和 createdAt 不可变)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileOptions {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
}
