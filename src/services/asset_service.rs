//! 永久资源存储。
//!
//! 归档文件最终交给资源库保存。`AssetStore` 是对资源库的抽象，
//! `LocalAssetStore` 把资源放在本地目录里，属性写到同名的
//! `.properties.json` 文件中。

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs as tokio_fs;

use crate::utils::lock_utils;

const PROPERTIES_SUFFIX: &str = ".properties.json";

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset folder does not exist: {0}")]
    FolderNotFound(String),

    #[error("invalid asset path: {0}")]
    InvalidPath(String),

    #[error("asset io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("asset metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFolder {
    /// 以 `/` 开头的资源路径，如 `/formdata/contact`
    pub path: String,
}

/// 新资源的内容
#[derive(Debug, Clone)]
pub struct AssetData {
    pub data: Vec<u8>,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Text,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetProperty {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: String,
    pub parent: String,
    pub filename: String,
    pub size: u64,
    pub creation_date: i64,
    pub properties: BTreeMap<String, AssetProperty>,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn folder_by_path(&self, path: &str) -> Result<Option<AssetFolder>, AssetError>;

    async fn create_folder(&self, parent: &AssetFolder, name: &str) -> Result<AssetFolder, AssetError>;

    /// 在 `parent` 下保存新资源；同名时自动改名，不覆盖已有资源。
    async fn create_asset(&self, parent: &AssetFolder, data: AssetData) -> Result<Asset, AssetError>;

    async fn set_property(
        &self,
        asset: &mut Asset,
        name: &str,
        kind: PropertyType,
        data: String,
    ) -> Result<(), AssetError>;
}

// 资源名只保留小写字母数字和 `-_.`
pub fn valid_filename(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let re = INVALID.get_or_init(|| Regex::new(r"[^a-z0-9_.-]+").expect("valid regex"));
    let lowered = name.trim().to_lowercase();
    let cleaned = re.replace_all(&lowered, "-");
    cleaned.trim_matches(|c| c == '-' || c == '.').to_string()
}

#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn resolve(&self, asset_path: &str) -> Result<PathBuf, AssetError> {
        let relative = asset_path.trim_start_matches('/');
        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                _ => return Err(AssetError::InvalidPath(asset_path.to_string())),
            }
        }
        Ok(resolved)
    }

    fn properties_path(file: &Path) -> PathBuf {
        let mut name = file.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(PROPERTIES_SUFFIX);
        file.with_file_name(name)
    }

    async fn write_metadata(&self, asset: &Asset) -> Result<(), AssetError> {
        let file = self.resolve(&asset.id)?;
        let json = serde_json::to_vec_pretty(asset)?;
        tokio_fs::write(Self::properties_path(&file), json).await?;
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<Asset, AssetError> {
        let file = self.resolve(id)?;
        let json = tokio_fs::read(Self::properties_path(&file)).await?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn folder_by_path(&self, path: &str) -> Result<Option<AssetFolder>, AssetError> {
        let dir = self.resolve(path)?;
        match tokio_fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Some(AssetFolder { path: normalize(path) })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_folder(&self, parent: &AssetFolder, name: &str) -> Result<AssetFolder, AssetError> {
        let name = valid_filename(name);
        if name.is_empty() {
            return Err(AssetError::InvalidPath(format!("{}/{}", parent.path, name)));
        }
        let path = format!("{}/{}", parent.path.trim_end_matches('/'), name);
        tokio_fs::create_dir_all(self.resolve(&path)?).await?;
        log::info!("创建资源目录: {}", path);
        Ok(AssetFolder { path })
    }

    async fn create_asset(&self, parent: &AssetFolder, data: AssetData) -> Result<Asset, AssetError> {
        let dir = self.resolve(&parent.path)?;
        if !tokio_fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(AssetError::FolderNotFound(parent.path.clone()));
        }

        let filename = valid_filename(&data.filename);
        let target = lock_utils::allocate_unique_path(&dir, &filename).await?;
        tokio_fs::write(&target, &data.data).await?;

        let filename = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&filename)
            .to_string();
        let asset = Asset {
            id: format!("{}/{}", parent.path.trim_end_matches('/'), filename),
            parent: parent.path.clone(),
            filename,
            size: data.data.len() as u64,
            creation_date: Utc::now().timestamp(),
            properties: BTreeMap::new(),
        };
        self.write_metadata(&asset).await?;

        log::info!("资源保存成功: {} ({} bytes)", asset.id, asset.size);
        Ok(asset)
    }

    async fn set_property(
        &self,
        asset: &mut Asset,
        name: &str,
        kind: PropertyType,
        data: String,
    ) -> Result<(), AssetError> {
        asset.properties.insert(name.to_string(), AssetProperty { kind, data });
        self.write_metadata(asset).await
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}
