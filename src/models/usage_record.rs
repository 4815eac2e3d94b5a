use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 使用记录数据结构
///
/// 每个 (profileId, modelName) 组合唯一对应一条记录；
/// 字段名与磁盘上 token-stats.json 的 camelCase 格式保持一致
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    pub profile_id: String,
    pub model_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// 冗余字段: 始终等于 input_tokens + output_tokens
    pub total_tokens: u64,
    pub request_count: u64,
    pub created_at: String,
    pub last_used_at: String,
}

impl UsageRecord {
    /// 创建新的使用记录 (首次出现的 key 组合)
    pub fn new(profile_id: String, model_name: String, input_tokens: u64, output_tokens: u64) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            profile_id,
            model_name,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            request_count: 1,
            created_at: now.clone(),
            last_used_at: now,
        }
    }

    /// 累加一次使用量并刷新时间戳
    pub fn merge(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.total_tokens = self.input_tokens + self.output_tokens;
        self.request_count += 1;
        self.last_used_at = Utc::now().to_rfc3339();
    }

    /// 是否匹配给定的 (profileId, modelName) 组合
    pub fn matches(&self, profile_id: &str, model_name: &str) -> bool {
        self.profile_id == profile_id && self.model_name == model_name
    }
}
