use std::path::PathBuf;
use std::time::Duration;

use crate::services::file_service::PathLocator;

// 上传策略：尺寸限制、扩展名白名单、文件字段名
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub size_limit: Option<u64>,
    pub allowed_extensions: Vec<String>,
    pub input_name: String,
    /// 单个文件允许的最大分片数
    pub max_total_parts: u32,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            size_limit: Some(100 * 1024 * 1024), // 100MB
            allowed_extensions: Vec::new(),
            input_name: "qqfile".to_string(),
            max_total_parts: 10_000,
        }
    }
}

/// 服务器自身的上传上限，配置的 size_limit 不能超过它们。
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    pub post_max_size: u64,
    pub upload_max_filesize: u64,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            post_max_size: 128 * 1024 * 1024,
            upload_max_filesize: 128 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub storage_root: PathBuf,
    pub asset_root: PathBuf,
    pub policy: UploadPolicy,
    pub limits: ServerLimits,
    pub chunks_expire_in: Duration,
    pub cleanup_interval: Duration,
    pub lock_idle_timeout: Duration,
    pub global_max_concurrent: usize,
    pub merge_max_concurrent: usize,
    pub address: String,
    pub port: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./var/formbuilder"),
            asset_root: PathBuf::from("./var/assets"),
            policy: UploadPolicy::default(),
            limits: ServerLimits::default(),
            chunks_expire_in: Duration::from_secs(604_800), // 一周
            cleanup_interval: Duration::from_secs(3600),
            lock_idle_timeout: Duration::from_secs(7200),
            global_max_concurrent: 64,
            merge_max_concurrent: 4,
            address: "127.0.0.1".to_string(),
            port: "2233".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        let args: Vec<String> = std::env::args().collect();
        // args[0] is executable path; optional args: address, port
        let address = args.get(1).cloned().unwrap_or_else(|| "127.0.0.1".to_string());
        let port = args.get(2).cloned().unwrap_or_else(|| "2233".to_string());

        let mut config = Self { address, port, ..Default::default() };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    // 环境变量覆盖，非法值只记录警告并保留默认值
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("FORMBUILDER_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(root) = lookup("FORMBUILDER_ASSET_ROOT") {
            self.asset_root = PathBuf::from(root);
        }
        if let Some(raw) = lookup("FORMBUILDER_SIZE_LIMIT") {
            if raw.trim().is_empty() || raw.trim() == "0" {
                self.policy.size_limit = None;
            } else {
                match to_bytes(&raw) {
                    Some(limit) => self.policy.size_limit = Some(limit),
                    None => log::warn!("忽略非法的 FORMBUILDER_SIZE_LIMIT: {}", raw),
                }
            }
        }
        if let Some(raw) = lookup("FORMBUILDER_ALLOWED_EXTENSIONS") {
            self.policy.allowed_extensions = raw
                .split(',')
                .map(|ext| ext.trim().trim_start_matches('.').to_string())
                .filter(|ext| !ext.is_empty())
                .collect();
        }
        if let Some(name) = lookup("FORMBUILDER_INPUT_NAME") {
            if !name.trim().is_empty() {
                self.policy.input_name = name.trim().to_string();
            }
        }
        if let Some(raw) = lookup("FORMBUILDER_MAX_TOTAL_PARTS") {
            match raw.trim().parse::<u32>() {
                Ok(parts) if parts > 0 => self.policy.max_total_parts = parts,
                _ => log::warn!("忽略非法的 FORMBUILDER_MAX_TOTAL_PARTS: {}", raw),
            }
        }
        if let Some(raw) = lookup("FORMBUILDER_CHUNKS_EXPIRE_SECS") {
            match raw.trim().parse() {
                Ok(secs) => self.chunks_expire_in = Duration::from_secs(secs),
                Err(_) => log::warn!("忽略非法的 FORMBUILDER_CHUNKS_EXPIRE_SECS: {}", raw),
            }
        }
        if let Some(raw) = lookup("FORMBUILDER_CLEANUP_INTERVAL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.cleanup_interval = Duration::from_secs(secs),
                _ => log::warn!("忽略非法的 FORMBUILDER_CLEANUP_INTERVAL_SECS: {}", raw),
            }
        }
        if let Some(raw) = lookup("FORMBUILDER_POST_MAX_SIZE") {
            match to_bytes(&raw) {
                Some(bytes) => self.limits.post_max_size = bytes,
                None => log::warn!("忽略非法的 FORMBUILDER_POST_MAX_SIZE: {}", raw),
            }
        }
        if let Some(raw) = lookup("FORMBUILDER_UPLOAD_MAX_FILESIZE") {
            match to_bytes(&raw) {
                Some(bytes) => self.limits.upload_max_filesize = bytes,
                None => log::warn!("忽略非法的 FORMBUILDER_UPLOAD_MAX_FILESIZE: {}", raw),
            }
        }
    }

    pub fn locator(&self) -> PathLocator {
        PathLocator::new(&self.storage_root)
    }

    pub async fn init_directories(&self) -> std::io::Result<()> {
        self.locator().init_directories().await?;
        tokio::fs::create_dir_all(self.asset_root.join("formdata")).await?;

        Ok(())
    }

    pub fn log_config(&self) {
        log::info!("配置信息:");
        match self.policy.size_limit {
            Some(limit) => log::info!("  - 最大文件大小: {}MB", limit / 1024 / 1024),
            None => log::info!("  - 最大文件大小: 不限制"),
        }
        if self.policy.allowed_extensions.is_empty() {
            log::info!("  - 允许的扩展名: 全部");
        } else {
            log::info!("  - 允许的扩展名: {}", self.policy.allowed_extensions.join(", "));
        }
        log::info!("  - 文件字段名: {}", self.policy.input_name);
        log::info!("  - 最大分片数: {}", self.policy.max_total_parts);
        log::info!("  - post_max_size: {}MB", self.limits.post_max_size / 1024 / 1024);
        log::info!("  - upload_max_filesize: {}MB", self.limits.upload_max_filesize / 1024 / 1024);
        log::info!("  - 分片过期时间: {}秒", self.chunks_expire_in.as_secs());
        log::info!("  - 清理间隔: {}秒", self.cleanup_interval.as_secs());
        log::info!("  - 全局并发限制: {}", self.global_max_concurrent);
        log::info!("  - 合并并发限制: {}", self.merge_max_concurrent);
        log::info!("存储目录: {}", self.storage_root.display());
        log::info!("资源目录: {}", self.asset_root.display());
    }
}

/// 把 "64M"、"2g"、"512k" 这类带单位的尺寸换算成字节（1024 进制）。
pub fn to_bytes(raw: &str) -> Option<u64> {
    let value = raw.trim();
    let last = value.chars().last()?;

    let (digits, multiplier) = match last.to_ascii_lowercase() {
        'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        'm' => (&value[..value.len() - 1], 1024 * 1024),
        'k' => (&value[..value.len() - 1], 1024),
        _ => (value, 1),
    };

    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}
