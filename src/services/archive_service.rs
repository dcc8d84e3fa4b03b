use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as tokio_fs;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::UploadError;
use crate::services::asset_service::{valid_filename, Asset, AssetData, AssetError, AssetStore, PropertyType};
use crate::services::file_service::PathLocator;
use crate::utils::validation_utils::SessionId;
use crate::utils::{file_utils, lock_utils};

pub const FORM_DATA_FOLDER: &str = "/formdata";
pub const LINKED_FORM_PROPERTY: &str = "linkedForm";

#[derive(Debug, Clone)]
struct ArchiveEntry {
    uuid: SessionId,
    display_name: String,
    path: PathBuf,
}

/// 已写入暂存区的归档
#[derive(Debug, Clone)]
pub struct ArchiveBlob {
    pub path: PathBuf,
    pub file_name: String,
    pub sessions: Vec<SessionId>,
}

/// 把一次表单提交的所有上传打包成 zip，再交给资源库保存。
#[derive(Clone)]
pub struct ArchiveService {
    locator: PathLocator,
    store: Arc<dyn AssetStore>,
}

impl ArchiveService {
    pub fn new(locator: PathLocator, store: Arc<dyn AssetStore>) -> Self {
        Self { locator, store }
    }

    /// 打包 `uuid -> 展示文件名` 中的上传。
    ///
    /// 只有 files 目录下恰好一个文件的会话会被收进归档，其余跳过；
    /// 一个都没有时返回 `None`。归档写完并 sync 之后才删除源文件。
    pub async fn bundle(&self, files: &BTreeMap<String, String>) -> Result<Option<ArchiveBlob>, UploadError> {
        let locator = self.locator.clone();
        let requested = files.clone();
        let entries = tokio::task::spawn_blocking(move || select_entries(&locator, &requested))
            .await
            .map_err(|e| UploadError::Storage(io::Error::other(format!("读取上传目录失败: {}", e))))?;

        if entries.is_empty() {
            log::info!("没有可打包的上传文件");
            return Ok(None);
        }

        let desired = format!("form-{}.zip", Utc::now().format("%Y%m%d%H%M%S"));
        let path = lock_utils::allocate_unique_path(&self.locator.zip_folder(), &desired).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&desired)
            .to_string();

        let written = {
            let path = path.clone();
            let entries = entries.clone();
            tokio::task::spawn_blocking(move || write_archive(&path, &entries))
                .await
                .map_err(|e| UploadError::Storage(io::Error::other(format!("打包任务失败: {}", e))))?
        };
        if let Err(err) = written {
            log::error!("创建归档失败 {}: {}", path.display(), err);
            if let Err(e) = tokio_fs::remove_file(&path).await {
                log::warn!("删除失败的归档 {} 出错: {}", path.display(), e);
            }
            return Err(err);
        }

        let sessions: Vec<SessionId> = entries.into_iter().map(|entry| entry.uuid).collect();
        for uuid in &sessions {
            let dir = self.locator.files_dir(uuid);
            if let Err(e) = tokio::task::spawn_blocking(move || file_utils::remove_dir_logged(&dir)).await {
                log::warn!("删除已归档的上传目录失败 {}: {}", uuid, e);
            }
        }

        log::info!("归档创建成功: {} (包含 {} 个文件)", path.display(), sessions.len());
        Ok(Some(ArchiveBlob { path, file_name, sessions }))
    }

    /// 打包并存入资源库 `/formdata/{表单名}`，标记回触发它的表单文档。
    ///
    /// 资源保存失败时保留暂存区的归档，便于人工恢复。
    pub async fn create_archive_asset(
        &self,
        files: &BTreeMap<String, String>,
        form_name: &str,
        template_id: u64,
    ) -> Result<Option<Asset>, UploadError> {
        let Some(blob) = self.bundle(files).await? else {
            return Ok(None);
        };

        match self.store_blob(&blob, form_name, template_id).await {
            Ok(asset) => {
                if let Err(e) = tokio_fs::remove_file(&blob.path).await {
                    log::warn!("删除暂存归档失败 {}: {}", blob.path.display(), e);
                }
                Ok(Some(asset))
            }
            Err(err) => {
                log::error!("保存归档到资源库失败，暂存文件保留在 {}: {}", blob.path.display(), err);
                Err(err)
            }
        }
    }

    async fn store_blob(&self, blob: &ArchiveBlob, form_name: &str, template_id: u64) -> Result<Asset, UploadError> {
        let data = tokio_fs::read(&blob.path).await?;

        let parent = self
            .store
            .folder_by_path(FORM_DATA_FOLDER)
            .await?
            .ok_or_else(|| AssetError::FolderNotFound(FORM_DATA_FOLDER.to_string()))?;

        let folder_path = format!("{}/{}", FORM_DATA_FOLDER, valid_filename(form_name));
        let folder = match self.store.folder_by_path(&folder_path).await? {
            Some(folder) => folder,
            None => self.store.create_folder(&parent, form_name).await?,
        };

        let mut asset = self
            .store
            .create_asset(&folder, AssetData { data, filename: blob.file_name.clone() })
            .await?;
        self.store
            .set_property(&mut asset, LINKED_FORM_PROPERTY, PropertyType::Document, template_id.to_string())
            .await?;

        Ok(asset)
    }
}

fn select_entries(locator: &PathLocator, files: &BTreeMap<String, String>) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();

    for (raw_uuid, display_name) in files {
        let Ok(uuid) = SessionId::parse(raw_uuid) else {
            log::warn!("跳过非法的 uuid: {}", raw_uuid);
            continue;
        };
        let dir = locator.files_dir(&uuid);
        match file_utils::list_regular_files(&dir) {
            Ok(found) if found.len() == 1 => entries.push(ArchiveEntry {
                uuid,
                display_name: display_name.clone(),
                path: found[0].clone(),
            }),
            Ok(found) => log::warn!("跳过 {}: 目录中有 {} 个文件", uuid, found.len()),
            Err(e) => log::warn!("跳过 {}: 读取目录失败: {}", uuid, e),
        }
    }

    entries
}

// 只取展示名的最后一段，重名时追加 -1、-2
fn entry_name(display_name: &str, fallback: &str, used: &mut HashSet<String>) -> String {
    let base = Path::new(display_name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(fallback)
        .to_string();

    if used.insert(base.clone()) {
        return base;
    }

    let path = Path::new(&base);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(fallback).to_string();
    let ext = path.extension().and_then(|e| e.to_str()).map(|e| format!(".{}", e)).unwrap_or_default();
    let mut counter = 1;
    loop {
        let candidate = format!("{}-{}{}", stem, counter, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn write_archive(path: &Path, entries: &[ArchiveEntry]) -> Result<(), UploadError> {
    let file = fs::OpenOptions::new().write(true).truncate(true).open(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    let mut used = HashSet::new();
    for entry in entries {
        let name = entry_name(&entry.display_name, entry.uuid.as_str(), &mut used);
        zip.start_file(name, options)?;
        let mut source = fs::File::open(&entry.path)?;
        io::copy(&mut source, &mut zip)?;
    }

    let file = zip.finish()?;
    file.sync_all()?;
    Ok(())
}
