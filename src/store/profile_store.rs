use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{CreateProfileOptions, Profile, ProfileConfig, UpdateProfileOptions};
use crate::utils::error::{AppError, Result};

/// Profile 配置存储 (JSON 文件)
///
/// 所有写操作 (create/update/delete) 在单个互斥锁内执行完整的
/// 读取-修改-写回循环，避免并发修改丢失更新
pub struct ProfileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// 读取配置文件，文件不存在时返回空配置
    async fn load(&self) -> Result<ProfileConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AppError::StorageError(format!(
                    "Failed to parse profile file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProfileConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// 写回整个配置文件
    ///
    /// 先写临时文件再改名，避免写一半时崩溃留下截断的 JSON
    async fn persist(&self, config: &ProfileConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(config)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// 获取当前配置快照 (只读)
    pub async fn snapshot(&self) -> Result<ProfileConfig> {
        self.load().await
    }

    /// 按转发凭证查找 profile，返回第一个匹配
    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Profile>> {
        let config = self.load().await?;
        Ok(config.profiles.into_iter().find(|p| p.api_key == api_key))
    }

    /// 创建新的配置方案，名称冲突时拒绝
    pub async fn create(&self, options: CreateProfileOptions) -> Result<Profile> {
        let _guard = self.lock.lock().await;

        let mut config = self.load().await?;
        if config.profiles.iter().any(|p| p.name == options.name) {
            return Err(AppError::BadRequest(format!(
                "Profile name '{}' already exists",
                options.name
            )));
        }

        let profile = Profile::new(options);
        info!("📝 Created profile: {} ({})", profile.name, profile.id);
        config.profiles.push(profile.clone());
        self.persist(&config).await?;

        Ok(profile)
    }

    /// 更新配置方案 (保留 id 和 createdAt)
    pub async fn update(&self, id: &str, options: UpdateProfileOptions) -> Result<Profile> {
        let _guard = self.lock.lock().await;

        let mut config = self.load().await?;

        // 检查新名称是否与其他方案冲突
        if config
            .profiles
            .iter()
            .any(|p| p.name == options.name && p.id != id)
        {
            return Err(AppError::BadRequest(format!(
                "Profile name '{}' already exists",
                options.name
            )));
        }

        let profile = config
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", id)))?;

        profile.name = options.name;
        profile.api_url = options.api_url;
        profile.api_key = options.api_key;
        profile.model_name = options.model_name;
        let updated = profile.clone();

        self.persist(&config).await?;
        debug!("Updated profile: {}", id);

        Ok(updated)
    }

    /// 激活配置方案 (设置 activeProfile 标记)
    pub async fn activate(&self, id: &str) -> Result<Profile> {
        let _guard = self.lock.lock().await;

        let mut config = self.load().await?;
        let profile = config
            .profiles
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", id)))?;

        config.active_profile = Some(profile.id.clone());
        self.persist(&config).await?;
        info!("✅ Activated profile: {} ({})", profile.name, profile.id);

        Ok(profile)
    }

    /// 删除配置方案；若被删除的方案处于激活状态，清除激活标记
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut config = self.load().await?;
        let before = config.profiles.len();
        config.profiles.retain(|p| p.id != id);

        if config.profiles.len() == before {
            return Err(AppError::NotFound(format!("Profile {} not found", id)));
        }

        if config.active_profile.as_deref() == Some(id) {
            config.active_profile = None;
        }

        self.persist(&config).await?;
        info!("🗑️ Deleted profile: {}", id);

        Ok(())
    }
}
