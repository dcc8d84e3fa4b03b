use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::config::{ServerLimits, UploadPolicy};
use crate::error::UploadError;
use crate::models::{UploadRequest, UploadedFile};
use crate::utils::file_utils;

static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
static SESSION_ID: OnceLock<Regex> = OnceLock::new();

fn non_alnum() -> &'static Regex {
    NON_ALNUM.get_or_init(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex"))
}

/// 客户端传来的 uuid，只允许字母数字、`-`、`_`，可以直接当目录名用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        let re = SESSION_ID.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid regex"));
        let raw = raw.trim();
        if re.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(UploadError::InvalidSessionId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// 去掉所有非字母数字字符："my photo.JPG" -> "myphotoJPG"
pub fn sanitize_filename(name: &str) -> String {
    non_alnum().replace_all(name, "").into_owned()
}

pub fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// 校验通过的上传
#[derive(Debug, Clone)]
pub struct ValidatedUpload<'a> {
    pub file: &'a UploadedFile,
    pub original_name: String,
    pub sanitized_name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct UploadValidator {
    policy: UploadPolicy,
    limits: ServerLimits,
}

impl UploadValidator {
    pub fn new(policy: UploadPolicy, limits: ServerLimits) -> Self {
        Self { policy, limits }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn limits(&self) -> &ServerLimits {
        &self.limits
    }

    /// 按顺序检查，遇到第一个失败立即返回；在任何字节写入存储区之前调用。
    pub fn validate<'a>(
        &self,
        request: &'a UploadRequest,
        files_folder: &Path,
    ) -> Result<ValidatedUpload<'a>, UploadError> {
        self.check_server_limits()?;

        if file_utils::is_inaccessible(files_folder) {
            return Err(UploadError::StorageInaccessible { path: files_folder.to_path_buf() });
        }

        match request.content_type.as_deref().map(str::trim) {
            None | Some("") => return Err(UploadError::MissingContentType),
            Some(ct) if !ct.to_ascii_lowercase().starts_with("multipart/") => {
                return Err(UploadError::NotMultipart)
            }
            Some(_) => {}
        }

        let file = request
            .file(&self.policy.input_name)
            .ok_or_else(|| UploadError::MissingFile { field: self.policy.input_name.clone() })?;
        if let Some(err) = &file.error {
            return Err(UploadError::Transport(err.clone()));
        }

        let original_name = request
            .original_name(&self.policy.input_name)
            .unwrap_or_default()
            .to_string();
        let sanitized_name = sanitize_filename(&original_name);
        if sanitized_name.is_empty() {
            return Err(UploadError::EmptyName);
        }

        let declared = request.total_file_size();
        let size = declared.unwrap_or(file.size);
        if size == 0 {
            return Err(UploadError::EmptyFile);
        }
        if let Some(limit) = self.policy.size_limit {
            let largest = size.max(file.size);
            if largest > limit {
                return Err(UploadError::TooLarge { size: largest, limit });
            }
        }

        self.check_extension(&original_name)?;

        Ok(ValidatedUpload { file, original_name, sanitized_name, size })
    }

    pub fn check_server_limits(&self) -> Result<(), UploadError> {
        let Some(limit) = self.policy.size_limit else {
            return Ok(());
        };

        if self.limits.post_max_size < limit || self.limits.upload_max_filesize < limit {
            let needed = format!("{}M", (limit / 1024 / 1024).max(1));
            log::error!("服务器上传上限低于配置的文件大小限制，需要至少 {}", needed);
            return Err(UploadError::ServerLimitsTooLow { needed });
        }
        Ok(())
    }

    /// `qqtotalparts` 来自客户端，超过上限直接拒绝
    pub fn check_total_parts(&self, total_parts: u32) -> Result<(), UploadError> {
        let max = self.policy.max_total_parts;
        if total_parts > max {
            return Err(UploadError::TooManyParts { total: total_parts, max });
        }
        Ok(())
    }

    pub fn check_extension(&self, original_name: &str) -> Result<(), UploadError> {
        let allowed = &self.policy.allowed_extensions;
        if allowed.is_empty() {
            return Ok(());
        }

        let extension = file_extension(original_name);
        if allowed.iter().any(|ext| ext.eq_ignore_ascii_case(&extension)) {
            Ok(())
        } else {
            Err(UploadError::InvalidExtension { extension, allowed: allowed.join(", ") })
        }
    }
}
