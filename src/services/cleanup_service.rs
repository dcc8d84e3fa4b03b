use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::models::SessionState;
use crate::services::file_service::PathLocator;
use crate::utils::{file_utils, lock_utils};

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct GcReport {
    pub expired_sessions: usize,
    pub stale_spool_files: usize,
    pub failed: usize,
}

// 定时清理，取代按请求概率触发
pub async fn start_background_cleanup(config: ServerConfig) {
    let locator = config.locator();
    let mut cleanup_interval = tokio::time::interval(config.cleanup_interval);

    loop {
        cleanup_interval.tick().await;

        log::info!("执行后台清理任务...");

        let locks_cleaned = lock_utils::cleanup_file_locks(config.lock_idle_timeout).await;
        let report = collect_expired(&locator, config.chunks_expire_in).await;

        log::info!(
            "清理完成 - 目录锁: {}, 过期分片: {}, 残留临时文件: {}, 失败: {}",
            locks_cleaned,
            report.expired_sessions,
            report.stale_spool_files,
            report.failed
        );
    }
}

/// 删除超过保留期的分片目录和传输层临时文件。失败只记录日志，不向调用方报错。
pub async fn collect_expired(locator: &PathLocator, expire_in: Duration) -> GcReport {
    let locator = locator.clone();
    match tokio::task::spawn_blocking(move || collect_expired_blocking(&locator, expire_in)).await {
        Ok(report) => report,
        Err(e) => {
            log::warn!("清理任务失败: {}", e);
            GcReport::default()
        }
    }
}

fn collect_expired_blocking(locator: &PathLocator, expire_in: Duration) -> GcReport {
    let mut report = GcReport::default();

    let chunks_folder = locator.chunks_folder();
    if file_utils::is_inaccessible(&chunks_folder) {
        log::warn!("分片目录不可写，跳过清理: {}", chunks_folder.display());
    } else {
        for_each_expired(&chunks_folder, expire_in, true, &mut report, |path, report| {
            if file_utils::remove_dir_logged(path) {
                report.expired_sessions += 1;
                log::info!("清理过期分片: {} -> {:?}", path.display(), SessionState::Expired);
            } else {
                report.failed += 1;
            }
        });
    }

    for_each_expired(&locator.tmp_folder(), expire_in, false, &mut report, |path, report| {
        match fs::remove_file(path) {
            Ok(()) => {
                report.stale_spool_files += 1;
                log::debug!("清理临时文件: {}", path.display());
            }
            Err(e) => {
                report.failed += 1;
                log::warn!("清理临时文件失败 {}: {}", path.display(), e);
            }
        }
    });

    report
}

fn for_each_expired(
    folder: &Path,
    expire_in: Duration,
    dirs: bool,
    report: &mut GcReport,
    mut remove: impl FnMut(&Path, &mut GcReport),
) {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("读取目录失败 {}: {}", folder.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() == dirs => {}
            _ => continue,
        }
        match file_utils::modified_age(&path) {
            Ok(age) if age > expire_in => remove(&path, report),
            Ok(_) => {}
            // 可能刚被合并删除
            Err(e) => log::debug!("读取修改时间失败 {}: {}", path.display(), e),
        }
    }
}

pub async fn graceful_shutdown(config: &ServerConfig) {
    log::info!("接收到关闭信号，开始优雅关闭...");

    log::info!("清理目录锁...");
    let locks_cleaned = lock_utils::cleanup_file_locks(Duration::ZERO).await;

    log::info!("清理过期分片...");
    let report = collect_expired(&config.locator(), config.chunks_expire_in).await;

    log::info!("优雅关闭完成 - 清理目录锁: {}, 过期分片: {}", locks_cleaned, report.expired_sessions);
}
