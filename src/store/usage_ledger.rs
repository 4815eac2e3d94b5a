use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::UsageRecord;
use crate::utils::error::{AppError, Result};

/// 磁盘上的统计文件结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    records: Vec<UsageRecord>,
}

/// Token 使用统计账本 (JSON 文件)
///
/// 后端存储没有原子自增，正确性完全依赖单一互斥锁串行化
/// 完整的 读取-合并-写回 周期；锁之外不做任何文件修改。
/// 不同 key 组合的并发更新同样经过这一个临界区。
pub struct UsageLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UsageLedger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// 读取统计文件，文件不存在时返回空账本
    async fn load(&self) -> Result<LedgerFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AppError::StorageError(format!(
                    "Failed to parse usage file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// 先写临时文件再改名，避免写一半时崩溃留下截断的 JSON
    async fn persist(&self, file: &LedgerFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(file)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// 记录一次使用量
    ///
    /// (profileId, modelName) 已存在时累加计数并刷新时间戳，
    /// 否则创建 requestCount=1 的新记录。返回更新后的记录。
    pub async fn update(
        &self,
        profile_id: &str,
        model_name: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<UsageRecord> {
        let _guard = self.lock.lock().await;

        let mut file = self.load().await?;

        let record = match file
            .records
            .iter_mut()
            .find(|r| r.matches(profile_id, model_name))
        {
            Some(existing) => {
                existing.merge(input_tokens, output_tokens);
                existing.clone()
            }
            None => {
                let record = UsageRecord::new(
                    profile_id.to_string(),
                    model_name.to_string(),
                    input_tokens,
                    output_tokens,
                );
                file.records.push(record.clone());
                record
            }
        };

        self.persist(&file).await?;

        debug!(
            "📊 Recorded usage for ({}, {}): input={}, output={}, requests={}",
            profile_id, model_name, record.input_tokens, record.output_tokens, record.request_count
        );

        Ok(record)
    }

    /// 获取所有使用记录
    pub async fn list(&self) -> Result<Vec<UsageRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.records)
    }

    /// 删除单条记录
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut file = self.load().await?;
        let before = file.records.len();
        file.records.retain(|r| r.id != id);

        if file.records.len() == before {
            return Err(AppError::NotFound(format!("Usage record {} not found", id)));
        }

        self.persist(&file).await?;
        Ok(())
    }

    /// 清空所有统计记录
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.persist(&LedgerFile::default()).await?;
        info!("🧹 Usage ledger cleared");
        Ok(())
    }
}
