use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;

use crate::utils::validation_utils::SessionId;

const CHUNKS_FOLDER: &str = "chunks";
const FILES_FOLDER: &str = "files";
const ZIP_FOLDER: &str = "zip";
const TMP_FOLDER: &str = "tmp";

/// 上传用到的几个存储区：
/// `{root}/chunks/{uuid}/{partIndex}`、`{root}/files/{uuid}/{filename}`、
/// `{root}/zip/{name}.zip`，以及传输层落盘用的 `{root}/tmp`。
#[derive(Debug, Clone)]
pub struct PathLocator {
    root: PathBuf,
}

impl PathLocator {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunks_folder(&self) -> PathBuf {
        self.root.join(CHUNKS_FOLDER)
    }

    pub fn files_folder(&self) -> PathBuf {
        self.root.join(FILES_FOLDER)
    }

    pub fn zip_folder(&self) -> PathBuf {
        self.root.join(ZIP_FOLDER)
    }

    pub fn tmp_folder(&self) -> PathBuf {
        self.root.join(TMP_FOLDER)
    }

    pub fn chunk_dir(&self, uuid: &SessionId) -> PathBuf {
        self.chunks_folder().join(uuid.as_str())
    }

    pub fn chunk_path(&self, uuid: &SessionId, part_index: u32) -> PathBuf {
        self.chunk_dir(uuid).join(part_index.to_string())
    }

    pub fn files_dir(&self, uuid: &SessionId) -> PathBuf {
        self.files_folder().join(uuid.as_str())
    }

    pub async fn init_directories(&self) -> std::io::Result<()> {
        tokio_fs::create_dir_all(self.chunks_folder()).await?;
        tokio_fs::create_dir_all(self.files_folder()).await?;
        tokio_fs::create_dir_all(self.zip_folder()).await?;
        tokio_fs::create_dir_all(self.tmp_folder()).await?;

        Ok(())
    }

    pub async fn ensure_chunk_dir(&self, uuid: &SessionId) -> std::io::Result<PathBuf> {
        let dir = self.chunk_dir(uuid);
        tokio_fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn ensure_files_dir(&self, uuid: &SessionId) -> std::io::Result<PathBuf> {
        let dir = self.files_dir(uuid);
        tokio_fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}
