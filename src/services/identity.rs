use std::sync::Arc;

use crate::models::Profile;
use crate::store::ProfileStore;
use crate::utils::error::Result;

/// 入站凭证 → 配置方案解析器
///
/// 对 profile 集合的只读查询；未命中不是错误，由调用方决定
/// 回退策略 (转发到默认上游并丢弃用量统计)
pub struct IdentityResolver {
    store: Arc<ProfileStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self { store }
    }

    /// 按转发凭证精确匹配，返回第一个命中的 profile
    pub async fn resolve(&self, credential: &str) -> Result<Option<Profile>> {
        self.store.find_by_api_key(credential).await
    }
}
