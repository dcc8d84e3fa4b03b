use actix_multipart::{Field, Multipart};
use actix_web::http::StatusCode;
use actix_web::{dev, web, Error, FromRequest, HttpRequest, HttpResponse, ResponseError};
use futures_util::TryStreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio::fs as tokio_fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::ServerLimits;
use crate::error::{ErrorKind, UploadError};
use crate::models::{ApiResponse, DeleteResponse, UploadRequest, UploadedFile, MISSING_PREVIEW};
use crate::state::{AppState, ACTIVE_UPLOADS};
use crate::utils::validation_utils::SessionId;

// 普通表单字段的上限
const MAX_FIELD_SIZE: usize = 64 * 1024;

fn remove_spool_files(paths: Vec<PathBuf>) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("删除上传临时文件失败 {}: {}", path.display(), e);
            }
        }
    }
}

fn transport<E: std::fmt::Display>(e: E) -> UploadError {
    UploadError::Transport(e.to_string())
}

fn report_error(state: &AppState, err: &UploadError) {
    state.record_error();
    match err.kind() {
        ErrorKind::ServerConfig | ErrorKind::TransientStorage => log::error!("上传请求失败: {}", err),
        _ => log::warn!("上传请求被拒绝 ({}): {}", err.reason(), err),
    }
}

/// 解析上传请求。文件部分先落到 `spool_dir`，返回的路径列表需要调用方在处理完后清理。
///
/// multipart 请求读取字段和文件；urlencoded 请求只读取字段；其他 content type
/// 只记录 content type，交给校验器拒绝。
async fn read_upload_request(
    req: &HttpRequest,
    mut payload: dev::Payload,
    spool_dir: &Path,
    limits: ServerLimits,
) -> Result<(UploadRequest, Vec<PathBuf>), UploadError> {
    let content_type = req
        .headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let mut request = UploadRequest { content_type: content_type.clone(), ..Default::default() };

    let lowered = content_type.unwrap_or_default().to_ascii_lowercase();
    if lowered.starts_with("multipart/") {
        let mut spooled = scopeguard::guard(Vec::new(), remove_spool_files);
        read_multipart(req, payload, spool_dir, limits, &mut request, &mut spooled).await?;
        Ok((request, scopeguard::ScopeGuard::into_inner(spooled)))
    } else if lowered.starts_with("application/x-www-form-urlencoded") {
        let form = web::Form::<HashMap<String, String>>::from_request(req, &mut payload)
            .await
            .map_err(transport)?;
        request.fields = form.into_inner();
        Ok((request, Vec::new()))
    } else {
        Ok((request, Vec::new()))
    }
}

async fn read_multipart(
    req: &HttpRequest,
    payload: dev::Payload,
    spool_dir: &Path,
    limits: ServerLimits,
    request: &mut UploadRequest,
    spooled: &mut Vec<PathBuf>,
) -> Result<(), UploadError> {
    let mut multipart = Multipart::new(req.headers(), payload);
    let mut body_size: u64 = 0;

    while let Some(mut field) = multipart.try_next().await.map_err(transport)? {
        let name = field.name().unwrap_or_default().to_string();
        let client_filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(|f| f.to_string());

        match client_filename {
            Some(client_filename) => {
                let path = spool_dir.join(Uuid::new_v4().to_string());
                spooled.push(path.clone());
                let mut file = spool_field(&mut field, &path, limits, &mut body_size).await?;
                file.client_filename = Some(client_filename);
                log::debug!("文件字段 {} 已写入临时文件 {} ({} bytes)", name, path.display(), file.size);
                request.files.insert(name, file);
            }
            None => {
                let mut value = Vec::new();
                while let Some(chunk) = field.try_next().await.map_err(transport)? {
                    body_size += chunk.len() as u64;
                    if value.len() + chunk.len() > MAX_FIELD_SIZE {
                        log::warn!("表单字段 {} 超过 {} bytes", name, MAX_FIELD_SIZE);
                        return Err(UploadError::RequestTooLarge { limit: MAX_FIELD_SIZE as u64 });
                    }
                    value.extend_from_slice(&chunk);
                }
                request.fields.insert(name, String::from_utf8_lossy(&value).into_owned());
            }
        }

        if body_size > limits.post_max_size {
            return Err(UploadError::RequestTooLarge { limit: limits.post_max_size });
        }
    }

    Ok(())
}

// 超过 upload_max_filesize 时继续读完这个字段但不再写盘，错误记在文件上
async fn spool_field(
    field: &mut Field,
    path: &Path,
    limits: ServerLimits,
    body_size: &mut u64,
) -> Result<UploadedFile, UploadError> {
    let mut out = tokio_fs::File::create(path).await.map_err(|e| {
        log::error!("创建上传临时文件失败 {}: {}", path.display(), e);
        UploadError::Storage(e)
    })?;

    let mut size: u64 = 0;
    let mut error = None;
    while let Some(chunk) = field.try_next().await.map_err(transport)? {
        size += chunk.len() as u64;
        *body_size += chunk.len() as u64;
        if *body_size > limits.post_max_size {
            return Err(UploadError::RequestTooLarge { limit: limits.post_max_size });
        }
        if size > limits.upload_max_filesize {
            error.get_or_insert_with(|| "file exceeds upload_max_filesize".to_string());
            continue;
        }
        out.write_all(&chunk).await?;
    }
    out.flush().await?;

    Ok(UploadedFile { client_filename: None, path: path.to_path_buf(), size, error })
}

async fn spool_request(
    state: &AppState,
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<(UploadRequest, Vec<PathBuf>), UploadError> {
    let spool_dir = state.uploads.locator().tmp_folder();
    tokio_fs::create_dir_all(&spool_dir).await?;
    read_upload_request(req, payload.into_inner(), &spool_dir, state.config.limits).await
}

pub async fn upload_file(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, Error> {
    state.record_request();

    let _permit = state.global_semaphore.acquire().await.map_err(|e| {
        log::error!("获取全局并发许可失败: {}", e);
        actix_web::error::ErrorServiceUnavailable("服务器繁忙，请稍后重试")
    })?;

    ACTIVE_UPLOADS.fetch_add(1, Ordering::Relaxed);
    let _active = scopeguard::guard((), |_| {
        ACTIVE_UPLOADS.fetch_sub(1, Ordering::Relaxed);
    });

    let result = async {
        let (request, spooled) = spool_request(&state, &req, payload).await?;
        let _spooled = scopeguard::guard(spooled, remove_spool_files);
        state.uploads.handle_upload(&request).await
    }
    .await;

    match result {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(err) => {
            report_error(&state, &err);
            Err(err.into())
        }
    }
}

pub async fn combine_chunks(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, Error> {
    state.record_request();

    let _permit = state.merge_semaphore.acquire().await.map_err(|e| {
        log::error!("获取合并并发许可失败: {}", e);
        actix_web::error::ErrorServiceUnavailable("服务器繁忙，请稍后重试")
    })?;

    let (request, spooled) = match spool_request(&state, &req, payload).await {
        Ok(parsed) => parsed,
        Err(err) => {
            report_error(&state, &err);
            return Err(err.into());
        }
    };
    let _spooled = scopeguard::guard(spooled, remove_spool_files);

    let response = state.uploads.combine_chunks(&request).await;
    if !response.success {
        state.record_error();
    }
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    Ok(HttpResponse::build(status).json(response))
}

pub async fn delete_upload(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    state.record_request();

    let raw_uuid = path.into_inner();
    match state.uploads.handle_delete(&raw_uuid).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(err) => {
            report_error(&state, &err);
            HttpResponse::build(err.status_code()).json(DeleteResponse {
                success: false,
                uuid: None,
                error: Some(err.to_string()),
                path: Some(raw_uuid),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InspectQuery {
    pub qqtotalparts: Option<u32>,
}

pub async fn inspect_upload(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<InspectQuery>,
) -> Result<HttpResponse, Error> {
    state.record_request();

    let uuid = SessionId::parse(&path.into_inner())?;
    let total_parts = query.qqtotalparts.unwrap_or(1).max(1);

    let session = match state.uploads.inspect_session(&uuid, total_parts).await {
        Ok(session) => session,
        Err(err) => {
            report_error(&state, &err);
            return Err(err.into());
        }
    };
    let missing = session.missing(MISSING_PREVIEW);
    let missing_count = session.missing_count();

    Ok(HttpResponse::Ok().json(ApiResponse {
        success: true,
        message: format!("已接收 {}/{} 个分片", session.received.len(), total_parts),
        data: Some(serde_json::json!({
            "session": session,
            "missing": missing,
            "missing_count": missing_count,
        })),
    }))
}
