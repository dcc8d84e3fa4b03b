use actix_web::ResponseError;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::fs as tokio_fs;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::UploadError;
use crate::models::{CombineResponse, SessionState, UploadRequest, UploadResponse, UploadSession, MISSING_PREVIEW};
use crate::services::file_service::PathLocator;
use crate::state::TOTAL_UPLOADED;
use crate::utils::validation_utils::{sanitize_filename, SessionId, UploadValidator, ValidatedUpload};
use crate::utils::{file_utils, lock_utils};

const STAGING_PREFIX: &str = ".assembling-";

/// 分片上传的写入、合并、删除
#[derive(Debug, Clone)]
pub struct UploadStream {
    locator: PathLocator,
    validator: UploadValidator,
}

impl UploadStream {
    pub fn new(locator: PathLocator, validator: UploadValidator) -> Self {
        Self { locator, validator }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.locator(),
            UploadValidator::new(config.policy.clone(), config.limits),
        )
    }

    pub fn locator(&self) -> &PathLocator {
        &self.locator
    }

    pub fn validator(&self) -> &UploadValidator {
        &self.validator
    }

    /// 处理一次上传：分片请求写入 chunks 区，单文件请求直接移入 files 区。
    pub async fn handle_upload(&self, request: &UploadRequest) -> Result<UploadResponse, UploadError> {
        let validated = self.validator.validate(request, &self.locator.files_folder())?;
        let uuid = SessionId::parse(request.uuid().unwrap_or_default())?;
        let total_parts = request.total_parts();

        if total_parts > 1 {
            self.validator.check_total_parts(total_parts)?;
            let part_index = request.part_index().unwrap_or(0);
            if part_index >= total_parts {
                return Err(UploadError::InvalidPartIndex { index: part_index, total: total_parts });
            }
            let chunks_folder = self.locator.chunks_folder();
            if file_utils::is_inaccessible(&chunks_folder) {
                return Err(UploadError::StorageInaccessible { path: chunks_folder });
            }
            self.write_chunk(&uuid, part_index, &validated).await?;
            log::info!("分片 {}/{} 写入成功: {}", part_index + 1, total_parts, uuid);
        } else {
            let target = self.store_single(&uuid, &validated).await?;
            log::info!("文件上传成功: {} (大小: {} bytes)", target.display(), validated.file.size);
        }

        TOTAL_UPLOADED.fetch_add(validated.file.size, Ordering::Relaxed);

        Ok(UploadResponse { success: true, uuid: uuid.to_string() })
    }

    // 重复写同一个分片只会覆盖
    async fn write_chunk(
        &self,
        uuid: &SessionId,
        part_index: u32,
        validated: &ValidatedUpload<'_>,
    ) -> Result<PathBuf, UploadError> {
        self.locator.ensure_chunk_dir(uuid).await?;
        let target = self.locator.chunk_path(uuid, part_index);

        file_utils::move_file(&validated.file.path, &target).await.map_err(|e| {
            log::error!("写入分片失败 {}: {}", target.display(), e);
            UploadError::Storage(e)
        })?;

        log::debug!("分片落盘: {} ({} bytes)", target.display(), validated.file.size);
        Ok(target)
    }

    async fn store_single(&self, uuid: &SessionId, validated: &ValidatedUpload<'_>) -> Result<PathBuf, UploadError> {
        let dir = self.locator.ensure_files_dir(uuid).await?;
        let target = dir.join(&validated.sanitized_name);

        file_utils::move_file(&validated.file.path, &target).await.map_err(|e| {
            log::error!("保存上传文件失败 {}: {}", target.display(), e);
            UploadError::Storage(e)
        })?;

        Ok(target)
    }

    /// 合并请求的协议响应，HTTP 状态码与 statusCode 字段一致。
    pub async fn combine_chunks(&self, request: &UploadRequest) -> CombineResponse {
        let raw_uuid = request.uuid().unwrap_or_default().to_string();

        match self.combine(request).await {
            Ok(uuid) => CombineResponse {
                status_code: 200,
                success: true,
                uuid: uuid.to_string(),
                prevent_retry: None,
                error: None,
            },
            Err(err) => {
                log::warn!("合并分片失败 {}: {}", raw_uuid, err);
                CombineResponse {
                    status_code: err.status_code().as_u16(),
                    success: false,
                    uuid: raw_uuid,
                    prevent_retry: err.prevent_retry().then_some(true),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn combine(&self, request: &UploadRequest) -> Result<SessionId, UploadError> {
        let uuid = SessionId::parse(request.uuid().unwrap_or_default())?;
        let name = sanitize_filename(request.original_name(&self.validator.policy().input_name).unwrap_or_default());
        if name.is_empty() {
            return Err(UploadError::EmptyName);
        }
        let total_parts = request.total_parts();

        // 同一个 uuid 的合并串行执行，保证只合并一次
        let lock = lock_utils::get_file_lock(&format!("combine:{}", uuid)).await;
        let _held = lock.lock().await;

        let session = self.inspect_session(&uuid, total_parts).await?;
        if session.assembled_file.as_deref() == Some(name.as_str()) {
            // 合并之后才到达的重传分片没有用处
            if !session.received.is_empty() {
                let chunk_dir = self.locator.chunk_dir(&uuid);
                log::info!("清理合并后残留的分片: {}", chunk_dir.display());
                self.remove_dir_blocking(chunk_dir).await;
            }
            log::info!("分片已合并过，直接返回: {}", uuid);
            return Ok(uuid);
        }
        if !session.is_complete() {
            return Err(UploadError::MissingParts {
                missing: session.missing(MISSING_PREVIEW),
                count: session.missing_count(),
            });
        }

        log::info!("=== 开始合并分片 ===");
        log::info!("uuid: {}, 文件名: {}, 总分块数: {}", uuid, name, total_parts);

        let chunk_dir = self.locator.chunk_dir(&uuid);
        let target = self.locator.files_dir(&uuid).join(&name);
        let size_limit = self.validator.policy().size_limit;

        let result = {
            let chunk_dir = chunk_dir.clone();
            let target = target.clone();
            tokio::task::spawn_blocking(move || assemble_chunks(&chunk_dir, total_parts, &target, size_limit))
                .await
                .map_err(|e| UploadError::Storage(io::Error::other(format!("合并任务失败: {}", e))))?
        };

        match result {
            Ok((size, elapsed)) => {
                self.remove_dir_blocking(chunk_dir).await;
                let speed = if elapsed > 0.0 { (size as f64 / 1024.0 / 1024.0) / elapsed } else { 0.0 };
                log::info!(
                    "文件合并成功: {} (大小: {} bytes, 合并速度: {:.2} MB/s) -> {:?}",
                    target.display(),
                    size,
                    speed,
                    SessionState::Assembled
                );
                Ok(uuid)
            }
            Err(err @ UploadError::SizeExceeded { .. }) => {
                // 超限的文件重传也没用，分片和结果一起丢弃
                self.remove_dir_blocking(chunk_dir).await;
                self.remove_dir_blocking(self.locator.files_dir(&uuid)).await;
                log::warn!("合并结果超出大小限制，已删除: {} -> {:?}", uuid, SessionState::Failed);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// 根据磁盘内容推断会话状态
    pub async fn inspect_session(&self, uuid: &SessionId, total_parts: u32) -> Result<UploadSession, UploadError> {
        self.validator.check_total_parts(total_parts)?;
        let chunk_dir = self.locator.chunk_dir(uuid);
        let files_dir = self.locator.files_dir(uuid);

        let (received, assembled_file) = tokio::task::spawn_blocking(move || -> io::Result<_> {
            let mut received = BTreeSet::new();
            match fs::read_dir(&chunk_dir) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        if let Some(index) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                            if index < total_parts {
                                received.insert(index);
                            }
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }

            let assembled_file = match file_utils::list_regular_files(&files_dir) {
                Ok(files) if files.len() == 1 => files[0]
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_string()),
                Ok(_) => None,
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e),
            };

            Ok((received, assembled_file))
        })
        .await
        .map_err(|e| UploadError::Storage(io::Error::other(format!("读取会话失败: {}", e))))??;

        let mut session = UploadSession {
            uuid: uuid.to_string(),
            total_parts,
            received,
            assembled_file,
            state: SessionState::Receiving,
        };
        session.state = if session.assembled_file.is_some() && session.received.is_empty() {
            SessionState::Assembled
        } else if session.is_complete() {
            SessionState::Complete
        } else {
            SessionState::Receiving
        };

        Ok(session)
    }

    /// 删除一个会话的已合并文件（连同可能残留的分片）
    pub async fn handle_delete(&self, raw_uuid: &str) -> Result<UploadResponse, UploadError> {
        let files_folder = self.locator.files_folder();
        if file_utils::is_inaccessible(&files_folder) {
            return Err(UploadError::StorageInaccessible { path: files_folder });
        }

        let uuid = SessionId::parse(raw_uuid).map_err(|_| UploadError::NotFound(raw_uuid.to_string()))?;
        let target = self.locator.files_dir(&uuid);

        if !tokio_fs::metadata(&target).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(UploadError::NotFound(uuid.to_string()));
        }

        tokio_fs::remove_dir_all(&target).await?;
        let chunk_dir = self.locator.chunk_dir(&uuid);
        if tokio_fs::metadata(&chunk_dir).await.is_ok() {
            self.remove_dir_blocking(chunk_dir).await;
        }

        log::info!("上传文件删除成功: {}", uuid);
        Ok(UploadResponse { success: true, uuid: uuid.to_string() })
    }

    async fn remove_dir_blocking(&self, dir: PathBuf) {
        if let Err(e) = tokio::task::spawn_blocking(move || file_utils::remove_dir_logged(&dir)).await {
            log::warn!("删除目录任务失败: {}", e);
        }
    }
}

/// 按序号 0..total_parts 拼接分片。
///
/// 先写到分片目录里的临时文件，全部写完并 sync 后再改名到目标位置，
/// 失败时目标文件不会出现。
fn assemble_chunks(
    chunk_dir: &Path,
    total_parts: u32,
    target: &Path,
    size_limit: Option<u64>,
) -> Result<(u64, f64), UploadError> {
    let start_time = Instant::now();

    let staging = chunk_dir.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
    let mut out = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&staging)?;
    let staging_guard = scopeguard::guard(staging, |path| {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("删除合并临时文件失败 {}: {}", path.display(), e);
            }
        }
    });

    let mut total: u64 = 0;
    for index in 0..total_parts {
        let part_path = chunk_dir.join(index.to_string());
        let mut part = match fs::File::open(&part_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UploadError::MissingParts { missing: vec![index], count: 1 });
            }
            Err(e) => return Err(e.into()),
        };
        total += io::copy(&mut part, &mut out)?;
    }

    out.sync_all()?;
    drop(out);

    if let Some(limit) = size_limit {
        if total > limit {
            return Err(UploadError::SizeExceeded { size: total, limit });
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&*staging_guard, target)?;
    scopeguard::ScopeGuard::into_inner(staging_guard);

    Ok((total, start_time.elapsed().as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerLimits, UploadPolicy};
    use crate::models::{
        UploadedFile, FIELD_FILENAME, FIELD_PART_INDEX, FIELD_TOTAL_FILE_SIZE, FIELD_TOTAL_PARTS, FIELD_UUID,
    };
    use tempfile::TempDir;

    const MB: usize = 1024 * 1024;

    async fn stream(limit: Option<u64>, allowed: &[&str]) -> (UploadStream, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathLocator::new(dir.path());
        locator.init_directories().await.unwrap();
        let validator = UploadValidator::new(
            UploadPolicy {
                size_limit: limit,
                allowed_extensions: allowed.iter().map(|s| s.to_string()).collect(),
                input_name: "qqfile".to_string(),
                max_total_parts: 10_000,
            },
            ServerLimits { post_max_size: u64::MAX, upload_max_filesize: u64::MAX },
        );
        (UploadStream::new(locator, validator), dir)
    }

    fn pattern(seed: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn request(stream: &UploadStream, uuid: &str, name: &str, fields: &[(&str, String)], body: &[u8]) -> UploadRequest {
        let spool = stream.locator().tmp_folder().join(Uuid::new_v4().to_string());
        fs::write(&spool, body).unwrap();

        let mut req = UploadRequest {
            content_type: Some("multipart/form-data; boundary=----x".to_string()),
            ..Default::default()
        };
        req.fields.insert(FIELD_UUID.to_string(), uuid.to_string());
        req.fields.insert(FIELD_FILENAME.to_string(), name.to_string());
        for (key, value) in fields {
            req.fields.insert(key.to_string(), value.clone());
        }
        req.files.insert(
            "qqfile".to_string(),
            UploadedFile { client_filename: Some("blob".to_string()), path: spool, size: body.len() as u64, error: None },
        );
        req
    }

    fn chunk(stream: &UploadStream, uuid: &str, index: u32, total: u32, body: &[u8]) -> UploadRequest {
        request(
            stream,
            uuid,
            "report.pdf",
            &[(FIELD_TOTAL_PARTS, total.to_string()), (FIELD_PART_INDEX, index.to_string())],
            body,
        )
    }

    fn combine_request(uuid: &str, total: u32) -> UploadRequest {
        let mut req = UploadRequest::default();
        req.fields.insert(FIELD_UUID.to_string(), uuid.to_string());
        req.fields.insert(FIELD_FILENAME.to_string(), "report.pdf".to_string());
        req.fields.insert(FIELD_TOTAL_PARTS.to_string(), total.to_string());
        req
    }

    #[tokio::test]
    async fn out_of_order_chunks_assemble_in_index_order() {
        let (stream, _dir) = stream(Some(10 * MB as u64), &[]).await;
        let parts = [pattern(1, 2 * MB), pattern(2, 2 * MB), pattern(3, 2 * MB)];

        for index in [1usize, 0, 2] {
            let resp = stream.handle_upload(&chunk(&stream, "sess-1", index as u32, 3, &parts[index])).await.unwrap();
            assert_eq!(resp, UploadResponse { success: true, uuid: "sess-1".to_string() });
        }

        let resp = stream.combine_chunks(&combine_request("sess-1", 3)).await;
        assert_eq!(resp, CombineResponse {
            status_code: 200,
            success: true,
            uuid: "sess-1".to_string(),
            prevent_retry: None,
            error: None,
        });

        let uuid = SessionId::parse("sess-1").unwrap();
        let files = file_utils::list_regular_files(&stream.locator().files_dir(&uuid)).unwrap();
        assert_eq!(files, vec![stream.locator().files_dir(&uuid).join("reportpdf")]);
        assert_eq!(fs::read(&files[0]).unwrap(), parts.concat());
        assert!(!stream.locator().chunk_dir(&uuid).exists());
    }

    #[tokio::test]
    async fn every_arrival_order_yields_the_same_bytes() {
        let parts: Vec<Vec<u8>> = (0..4).map(|i| pattern(i as u8, 1000 + i * 17)).collect();
        let orders = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];

        for (n, order) in orders.iter().enumerate() {
            let (stream, _dir) = stream(None, &[]).await;
            let uuid = format!("order-{}", n);
            for &index in order {
                stream.handle_upload(&chunk(&stream, &uuid, index as u32, 4, &parts[index])).await.unwrap();
            }
            assert!(stream.combine_chunks(&combine_request(&uuid, 4)).await.success);

            let id = SessionId::parse(&uuid).unwrap();
            let assembled = fs::read(stream.locator().files_dir(&id).join("reportpdf")).unwrap();
            assert_eq!(assembled, parts.concat(), "order {:?}", order);
        }
    }

    #[tokio::test]
    async fn oversized_assembly_is_discarded_without_retry() {
        let (stream, _dir) = stream(Some(10 * MB as u64), &[]).await;
        for index in 0..3u32 {
            stream.handle_upload(&chunk(&stream, "big", index, 3, &pattern(index as u8, 4 * MB))).await.unwrap();
        }

        let resp = stream.combine_chunks(&combine_request("big", 3)).await;
        assert_eq!(resp.status_code, 413);
        assert!(!resp.success);
        assert_eq!(resp.uuid, "big");
        assert_eq!(resp.prevent_retry, Some(true));

        let uuid = SessionId::parse("big").unwrap();
        assert!(!stream.locator().files_dir(&uuid).exists());
        assert!(!stream.locator().chunk_dir(&uuid).exists());
    }

    #[tokio::test]
    async fn combine_before_all_parts_fails_and_can_be_retried() {
        let (stream, _dir) = stream(None, &[]).await;
        let parts = [pattern(7, 300), pattern(8, 300), pattern(9, 300)];
        stream.handle_upload(&chunk(&stream, "gap", 0, 3, &parts[0])).await.unwrap();
        stream.handle_upload(&chunk(&stream, "gap", 2, 3, &parts[2])).await.unwrap();

        let uuid = SessionId::parse("gap").unwrap();
        for _ in 0..2 {
            let resp = stream.combine_chunks(&combine_request("gap", 3)).await;
            assert_eq!(resp.status_code, 409);
            assert_eq!(resp.prevent_retry, None);
            assert!(resp.error.unwrap().contains("[1]"));
            assert!(!stream.locator().files_dir(&uuid).exists());
        }

        let session = stream.inspect_session(&uuid, 3).await.unwrap();
        assert_eq!(session.state, SessionState::Receiving);
        assert_eq!(session.missing(MISSING_PREVIEW), vec![1]);

        stream.handle_upload(&chunk(&stream, "gap", 1, 3, &parts[1])).await.unwrap();
        assert_eq!(stream.inspect_session(&uuid, 3).await.unwrap().state, SessionState::Complete);
        assert!(stream.combine_chunks(&combine_request("gap", 3)).await.success);
        assert_eq!(stream.inspect_session(&uuid, 3).await.unwrap().state, SessionState::Assembled);
    }

    #[tokio::test]
    async fn repeated_combine_is_answered_from_the_assembled_file() {
        let (stream, _dir) = stream(None, &[]).await;
        stream.handle_upload(&chunk(&stream, "twice", 0, 2, b"hello ")).await.unwrap();
        stream.handle_upload(&chunk(&stream, "twice", 1, 2, b"world")).await.unwrap();

        assert!(stream.combine_chunks(&combine_request("twice", 2)).await.success);
        let again = stream.combine_chunks(&combine_request("twice", 2)).await;
        assert_eq!(again.status_code, 200);

        let uuid = SessionId::parse("twice").unwrap();
        assert_eq!(fs::read(stream.locator().files_dir(&uuid).join("reportpdf")).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn late_chunk_after_combine_does_not_break_a_repeated_combine() {
        let (stream, _dir) = stream(None, &[]).await;
        stream.handle_upload(&chunk(&stream, "late", 0, 2, b"head-")).await.unwrap();
        stream.handle_upload(&chunk(&stream, "late", 1, 2, b"tail")).await.unwrap();
        assert!(stream.combine_chunks(&combine_request("late", 2)).await.success);

        stream.handle_upload(&chunk(&stream, "late", 1, 2, b"tail")).await.unwrap();
        let uuid = SessionId::parse("late").unwrap();
        assert!(stream.locator().chunk_dir(&uuid).exists());

        let again = stream.combine_chunks(&combine_request("late", 2)).await;
        assert_eq!(again.status_code, 200);
        assert!(!stream.locator().chunk_dir(&uuid).exists());
        assert_eq!(fs::read(stream.locator().files_dir(&uuid).join("reportpdf")).unwrap(), b"head-tail");
    }

    #[tokio::test]
    async fn huge_part_counts_are_rejected_with_a_short_answer() {
        let (stream, _dir) = stream(None, &[]).await;

        let resp = stream.combine_chunks(&combine_request("flood", u32::MAX)).await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.prevent_retry, Some(true));
        assert!(resp.error.unwrap().len() < 128);

        let uuid = SessionId::parse("flood").unwrap();
        assert!(matches!(
            stream.inspect_session(&uuid, u32::MAX).await,
            Err(UploadError::TooManyParts { .. })
        ));

        let err = stream.handle_upload(&chunk(&stream, "flood", 0, u32::MAX, b"x")).await.unwrap_err();
        assert!(matches!(err, UploadError::TooManyParts { total: u32::MAX, max: 10_000 }));
        assert!(!stream.locator().chunk_dir(&uuid).exists());
    }

    #[tokio::test]
    async fn missing_parts_error_lists_only_a_preview() {
        let (stream, _dir) = stream(None, &[]).await;
        stream.handle_upload(&chunk(&stream, "sparse", 0, 10_000, b"x")).await.unwrap();

        let resp = stream.combine_chunks(&combine_request("sparse", 10_000)).await;
        assert_eq!(resp.status_code, 409);
        let error = resp.error.unwrap();
        assert!(error.contains("(9999 in total)"));
        assert!(error.len() < 256);
    }

    #[tokio::test]
    async fn resent_chunk_overwrites_the_previous_copy() {
        let (stream, _dir) = stream(None, &[]).await;
        stream.handle_upload(&chunk(&stream, "retry", 0, 2, b"broken")).await.unwrap();
        stream.handle_upload(&chunk(&stream, "retry", 0, 2, b"fixed-")).await.unwrap();
        stream.handle_upload(&chunk(&stream, "retry", 1, 2, b"tail")).await.unwrap();

        assert!(stream.combine_chunks(&combine_request("retry", 2)).await.success);
        let uuid = SessionId::parse("retry").unwrap();
        assert_eq!(fs::read(stream.locator().files_dir(&uuid).join("reportpdf")).unwrap(), b"fixed-tail");
    }

    #[tokio::test]
    async fn part_index_outside_declared_range_is_rejected() {
        let (stream, _dir) = stream(None, &[]).await;
        let err = stream.handle_upload(&chunk(&stream, "range", 3, 3, b"x")).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidPartIndex { index: 3, total: 3 }));
        assert!(!stream.locator().chunk_dir(&SessionId::parse("range").unwrap()).exists());
    }

    #[tokio::test]
    async fn rejected_extension_writes_nothing() {
        let (stream, _dir) = stream(Some(10 * MB as u64), &["jpg", "png"]).await;
        let req = request(&stream, "exe-1", "setup.exe", &[], b"MZ\x90\x00");

        let err = stream.handle_upload(&req).await.unwrap_err();
        assert!(err.to_string().contains("jpg, png"));
        assert!(err.prevent_retry());

        assert_eq!(fs::read_dir(stream.locator().files_folder()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(stream.locator().chunks_folder()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn single_part_upload_goes_straight_to_files() {
        let (stream, _dir) = stream(Some(MB as u64), &["jpg"]).await;
        let req = request(&stream, "small", "cat photo.JPG", &[(FIELD_TOTAL_FILE_SIZE, "4".to_string())], b"meow");

        stream.handle_upload(&req).await.unwrap();

        let uuid = SessionId::parse("small").unwrap();
        assert_eq!(fs::read(stream.locator().files_dir(&uuid).join("catphotoJPG")).unwrap(), b"meow");
        assert!(!req.files["qqfile"].path.exists());
        assert_eq!(fs::read_dir(stream.locator().chunks_folder()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unsafe_session_ids_never_reach_the_filesystem() {
        let (stream, _dir) = stream(None, &[]).await;
        let err = stream.handle_upload(&request(&stream, "../../etc", "a.txt", &[], b"x")).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidSessionId));
    }

    #[tokio::test]
    async fn delete_removes_the_session_directory() {
        let (stream, _dir) = stream(None, &[]).await;
        stream.handle_upload(&request(&stream, "del", "a.txt", &[], b"abc")).await.unwrap();

        let resp = stream.handle_delete("del").await.unwrap();
        assert_eq!(resp.uuid, "del");
        assert!(!stream.locator().files_dir(&SessionId::parse("del").unwrap()).exists());

        let err = stream.handle_delete("del").await.unwrap_err();
        assert_eq!(err.to_string(), "File not found! Unable to delete. UUID: del");
    }
}
