use actix_web::web;
use chrono::Utc;
use std::path::Path;

use crate::services::file_service::PathLocator;
use crate::state::{AppState, SERVER_START_TIME};
use crate::utils::{file_utils, lock_utils};

pub async fn get_health_info(state: web::Data<AppState>) -> serde_json::Value {
    let resources = monitor_system_resources(state.uploads.locator()).await;
    let app_stats = state.get_stats();
    let limits = state.uploads.validator().limits();

    serde_json::json!({
        "status": if resources["storage_writable"] == true { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "resources": resources,
        "app_stats": app_stats,
        "limits": {
            "post_max_size": limits.post_max_size,
            "upload_max_filesize": limits.upload_max_filesize,
            "max_total_parts": state.uploads.validator().policy().max_total_parts,
        },
    })
}

fn area_stats(folder: &Path) -> serde_json::Value {
    let mut entries = 0usize;
    let mut files = 0usize;
    let mut size = 0u64;

    if let Ok(dir) = std::fs::read_dir(folder) {
        for entry in dir.flatten() {
            entries += 1;
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => {
                    if let Err(e) = file_utils::count_files_recursive(&entry.path(), &mut files, &mut size) {
                        log::debug!("统计目录失败 {}: {}", entry.path().display(), e);
                    }
                }
                Ok(ft) if ft.is_file() => {
                    files += 1;
                    size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
                _ => {}
            }
        }
    }

    serde_json::json!({
        "entries": entries,
        "files": files,
        "size": size,
    })
}

pub async fn get_system_stats(state: web::Data<AppState>) -> Result<serde_json::Value, String> {
    let locator = state.uploads.locator().clone();
    let stats = tokio::task::spawn_blocking(move || {
        serde_json::json!({
            "chunks": area_stats(&locator.chunks_folder()),
            "files": area_stats(&locator.files_folder()),
            "zip": area_stats(&locator.zip_folder()),
            "tmp": area_stats(&locator.tmp_folder()),
        })
    }).await.map_err(|e| format!("阻塞任务失败: {}", e))?;

    // 合并应用状态统计
    let mut stats_value = stats;
    if let (Some(obj), serde_json::Value::Object(app)) = (stats_value.as_object_mut(), state.get_stats()) {
        obj.extend(app);
    }

    Ok(stats_value)
}

// 系统资源监控
pub async fn monitor_system_resources(locator: &PathLocator) -> serde_json::Value {
    let file_locks_count = lock_utils::get_file_lock_count().await;
    let storage_writable = !file_utils::is_inaccessible(&locator.files_folder())
        && !file_utils::is_inaccessible(&locator.chunks_folder());

    serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "file_locks_count": file_locks_count,
        "storage_root": locator.root().display().to_string(),
        "storage_writable": storage_writable,
        "uptime_seconds": (Utc::now().timestamp() as u64)
            .saturating_sub(SERVER_START_TIME.load(std::sync::atomic::Ordering::Relaxed)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_stats_counts_nested_and_flat_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("s1")).unwrap();
        std::fs::write(dir.path().join("s1/0"), b"abc").unwrap();
        std::fs::write(dir.path().join("s1/1"), b"de").unwrap();
        std::fs::write(dir.path().join("loose"), b"f").unwrap();

        let stats = area_stats(dir.path());
        assert_eq!(stats["entries"], 2);
        assert_eq!(stats["files"], 3);
        assert_eq!(stats["size"], 6);
    }
}
