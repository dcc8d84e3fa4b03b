use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use crate::error::UploadError;

// Fine Uploader 协议字段
pub const FIELD_FILENAME: &str = "qqfilename";
pub const FIELD_UUID: &str = "qquuid";
pub const FIELD_TOTAL_PARTS: &str = "qqtotalparts";
pub const FIELD_PART_INDEX: &str = "qqpartindex";
pub const FIELD_TOTAL_FILE_SIZE: &str = "qqtotalfilesize";

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub reason: &'static str,
    #[serde(rename = "preventRetry", skip_serializing_if = "Option::is_none")]
    pub prevent_retry: Option<bool>,
}

impl From<&UploadError> for ErrorBody {
    fn from(err: &UploadError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            reason: err.reason(),
            prevent_retry: err.prevent_retry().then_some(true),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub success: bool,
    pub uuid: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CombineResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub success: bool,
    pub uuid: String,
    #[serde(rename = "preventRetry", skip_serializing_if = "Option::is_none")]
    pub prevent_retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DeleteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    /// uuid -> 邮件里展示的文件名
    pub files: BTreeMap<String, String>,
    pub form_name: String,
    pub template_id: u64,
}

/// 传输层已经落盘的文件部分
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub client_filename: Option<String>,
    pub path: PathBuf,
    pub size: u64,
    pub error: Option<String>,
}

/// 一次上传请求：content type、普通表单字段和文件部分。
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub content_type: Option<String>,
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, UploadedFile>,
}

impl UploadRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn uuid(&self) -> Option<&str> {
        self.field(FIELD_UUID)
    }

    pub fn total_parts(&self) -> u32 {
        self.field(FIELD_TOTAL_PARTS)
            .and_then(|s| s.parse().ok())
            .unwrap_or(1)
            .max(1)
    }

    pub fn part_index(&self) -> Option<u32> {
        self.field(FIELD_PART_INDEX).and_then(|s| s.parse().ok())
    }

    pub fn total_file_size(&self) -> Option<u64> {
        self.field(FIELD_TOTAL_FILE_SIZE).and_then(|s| s.parse().ok())
    }

    pub fn file(&self, input_name: &str) -> Option<&UploadedFile> {
        self.files.get(input_name)
    }

    /// qqfilename 优先，否则用文件部分自带的文件名
    pub fn original_name(&self, input_name: &str) -> Option<&str> {
        self.field(FIELD_FILENAME).or_else(|| {
            self.file(input_name)
                .and_then(|file| file.client_filename.as_deref())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Receiving,
    Complete,
    Assembled,
    /// 被垃圾回收删除，目录已不存在
    Expired,
    /// 合并后超出尺寸限制，结果已丢弃
    Failed,
}

/// 磁盘上某个 uuid 的上传状态
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub uuid: String,
    pub total_parts: u32,
    pub received: BTreeSet<u32>,
    pub assembled_file: Option<String>,
    pub state: SessionState,
}

/// 错误信息和查询结果里最多列出的缺失序号
pub const MISSING_PREVIEW: usize = 32;

impl UploadSession {
    /// 缺失的分片数；`received` 只含小于 `total_parts` 的序号
    pub fn missing_count(&self) -> usize {
        (self.total_parts as usize).saturating_sub(self.received.len())
    }

    /// 前 `limit` 个缺失序号
    pub fn missing(&self, limit: usize) -> Vec<u32> {
        (0..self.total_parts)
            .filter(|index| !self.received.contains(index))
            .take(limit)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total_parts as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(fields: &[(&str, &str)]) -> UploadRequest {
        UploadRequest {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn protocol_fields_fall_back_to_single_part() {
        let req = request(&[(FIELD_UUID, " abc "), (FIELD_TOTAL_PARTS, "0")]);
        assert_eq!(req.uuid(), Some("abc"));
        assert_eq!(req.total_parts(), 1);
        assert_eq!(req.part_index(), None);

        let req = request(&[(FIELD_TOTAL_PARTS, "3"), (FIELD_PART_INDEX, "2")]);
        assert_eq!(req.total_parts(), 3);
        assert_eq!(req.part_index(), Some(2));
    }

    #[test]
    fn original_name_prefers_protocol_field() {
        let mut req = request(&[(FIELD_FILENAME, "report.pdf")]);
        req.files.insert(
            "qqfile".to_string(),
            UploadedFile {
                client_filename: Some("blob".to_string()),
                path: PathBuf::from("/tmp/x"),
                size: 1,
                error: None,
            },
        );
        assert_eq!(req.original_name("qqfile"), Some("report.pdf"));

        req.fields.clear();
        assert_eq!(req.original_name("qqfile"), Some("blob"));
    }

    #[test]
    fn session_reports_missing_parts() {
        let session = UploadSession {
            uuid: "u".to_string(),
            total_parts: 4,
            received: BTreeSet::from([0, 2]),
            assembled_file: None,
            state: SessionState::Receiving,
        };
        assert_eq!(session.missing(MISSING_PREVIEW), vec![1, 3]);
        assert_eq!(session.missing_count(), 2);
        assert!(!session.is_complete());
    }

    #[test]
    fn missing_list_is_bounded_for_huge_part_counts() {
        let session = UploadSession {
            uuid: "u".to_string(),
            total_parts: u32::MAX,
            received: BTreeSet::from([0]),
            assembled_file: None,
            state: SessionState::Receiving,
        };
        assert!(!session.is_complete());
        assert_eq!(session.missing_count(), u32::MAX as usize - 1);
        assert_eq!(session.missing(MISSING_PREVIEW), (1..=32).collect::<Vec<u32>>());
    }

    #[test]
    fn error_body_only_carries_prevent_retry_when_set() {
        let body = serde_json::to_value(ErrorBody::from(&UploadError::TooLarge { size: 2, limit: 1 })).unwrap();
        assert_eq!(body["preventRetry"], true);
        assert_eq!(body["error"], "File is too large.");

        let body = serde_json::to_value(ErrorBody::from(&UploadError::MissingParts { missing: vec![0], count: 1 })).unwrap();
        assert!(body.get("preventRetry").is_none());
    }
}
