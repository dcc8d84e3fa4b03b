use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::path::PathBuf;

use crate::models::ErrorBody;

/// 错误大类，运维可以据此区分"服务器配置错误"和"客户端上传了不合规的文件"。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Protocol,
    ServerConfig,
    TransientStorage,
    Integrity,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Server error. Increase post_max_size and upload_max_filesize to {needed}")]
    ServerLimitsTooLow { needed: String },

    #[error("Server error. Upload directory isn't writable or executable.")]
    StorageInaccessible { path: PathBuf },

    #[error("No files were uploaded.")]
    MissingContentType,

    #[error("Server error. Not a multipart request. Please set forceMultipart to default value (true).")]
    NotMultipart,

    #[error("No file was found in field '{field}'.")]
    MissingFile { field: String },

    #[error("Upload Error #{0}")]
    Transport(String),

    #[error("Invalid upload id.")]
    InvalidSessionId,

    #[error("File name empty.")]
    EmptyName,

    #[error("File is empty.")]
    EmptyFile,

    #[error("File is too large.")]
    TooLarge { size: u64, limit: u64 },

    #[error("File has an invalid extension, it should be one of {allowed}.")]
    InvalidExtension { extension: String, allowed: String },

    #[error("Invalid part index {index} for {total} parts.")]
    InvalidPartIndex { index: u32, total: u32 },

    #[error("Too many file parts: {total} (at most {max}).")]
    TooManyParts { total: u32, max: u32 },

    #[error("Request is too large, the limit is {limit} bytes.")]
    RequestTooLarge { limit: u64 },

    #[error("Could not save uploaded file: {0}")]
    Storage(#[from] std::io::Error),

    /// `missing` 只保留前几个序号，`count` 是缺失总数
    #[error("Missing file parts: {missing:?} ({count} in total)")]
    MissingParts { missing: Vec<u32>, count: usize },

    #[error("Assembled file exceeds the size limit ({size} > {limit} bytes).")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("File not found! Unable to delete. UUID: {0}")]
    NotFound(String),

    #[error("Could not create archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Could not store archive: {0}")]
    Asset(#[from] crate::services::asset_service::AssetError),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServerLimitsTooLow { .. } | Self::StorageInaccessible { .. } => ErrorKind::ServerConfig,
            Self::MissingContentType | Self::NotMultipart | Self::Transport(_) => ErrorKind::Protocol,
            Self::MissingFile { .. }
            | Self::InvalidSessionId
            | Self::EmptyName
            | Self::EmptyFile
            | Self::TooLarge { .. }
            | Self::InvalidExtension { .. }
            | Self::InvalidPartIndex { .. }
            | Self::TooManyParts { .. }
            | Self::RequestTooLarge { .. }
            | Self::NotFound(_) => ErrorKind::Client,
            Self::Storage(_) | Self::Archive(_) | Self::Asset(_) => ErrorKind::TransientStorage,
            Self::MissingParts { .. } | Self::SizeExceeded { .. } => ErrorKind::Integrity,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::ServerLimitsTooLow { .. } => "server_limits_too_low",
            Self::StorageInaccessible { .. } => "storage_inaccessible",
            Self::MissingContentType => "missing_content_type",
            Self::NotMultipart => "not_multipart",
            Self::MissingFile { .. } => "missing_file",
            Self::Transport(_) => "transport_error",
            Self::InvalidSessionId => "invalid_uuid",
            Self::EmptyName => "empty_name",
            Self::EmptyFile => "empty_file",
            Self::TooLarge { .. } => "too_large",
            Self::InvalidExtension { .. } => "invalid_extension",
            Self::InvalidPartIndex { .. } => "invalid_part_index",
            Self::TooManyParts { .. } => "too_many_parts",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::Storage(_) => "storage_error",
            Self::MissingParts { .. } => "missing_part",
            Self::SizeExceeded { .. } => "size_exceeded",
            Self::NotFound(_) => "not_found",
            Self::Archive(_) => "archive_error",
            Self::Asset(_) => "asset_error",
        }
    }

    /// 重试也无济于事的错误，客户端不应自动重传。
    pub fn prevent_retry(&self) -> bool {
        match self.kind() {
            ErrorKind::Client => true,
            ErrorKind::Integrity => matches!(self, Self::SizeExceeded { .. }),
            _ => false,
        }
    }
}

impl ResponseError for UploadError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TooLarge { .. } | Self::SizeExceeded { .. } | Self::RequestTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingParts { .. } => StatusCode::CONFLICT,
            _ => match self.kind() {
                ErrorKind::Client | ErrorKind::Protocol => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::from(self))
    }
}
