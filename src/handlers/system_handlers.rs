use actix_web::{web, HttpResponse};
use crate::{models::ApiResponse, state::AppState};
use crate::services::{system_service, cleanup_service};

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    state.record_request();

    let health_info = system_service::get_health_info(state.clone()).await;

    // 存储不可写时返回 503
    if health_info["status"] != "healthy" {
        log::error!("存储目录不可写: {}", state.config.storage_root.display());
        return HttpResponse::ServiceUnavailable().json(ApiResponse {
            success: false,
            message: "存储目录不可写".to_string(),
            data: Some(health_info),
        });
    }

    HttpResponse::Ok().json(ApiResponse {
        success: true,
        message: "服务运行正常".to_string(),
        data: Some(health_info),
    })
}

pub async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    state.record_request();

    match system_service::get_system_stats(state.clone()).await {
        Ok(stats) => HttpResponse::Ok().json(ApiResponse {
            success: true,
            message: "获取统计信息成功".to_string(),
            data: Some(stats),
        }),
        Err(e) => {
            log::error!("获取统计信息失败: {}", e);
            state.record_error();
            HttpResponse::InternalServerError().json(ApiResponse::<()> {
                success: false,
                message: e,
                data: None,
            })
        }
    }
}

// 立即执行一次过期分片回收
pub async fn run_cleanup(state: web::Data<AppState>) -> HttpResponse {
    state.record_request();

    let report = cleanup_service::collect_expired(state.uploads.locator(), state.config.chunks_expire_in).await;
    log::info!(
        "手动清理完成: 过期分片 {} 个, 临时文件 {} 个, 失败 {} 个",
        report.expired_sessions,
        report.stale_spool_files,
        report.failed
    );

    HttpResponse::Ok().json(ApiResponse {
        success: report.failed == 0,
        message: format!(
            "清理了 {} 个过期分片, {} 个临时文件",
            report.expired_sessions, report.stale_spool_files
        ),
        data: Some(report),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::handlers::configure_routes;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn health_and_cleanup_endpoints_respond() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.storage_root = dir.path().join("storage");
        config.asset_root = dir.path().join("assets");
        config.init_directories().await.unwrap();
        let state = AppState::new(config);

        let app = test::init_service(
            App::new().app_data(web::Data::new(state.clone())).configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(json["data"]["status"], "healthy");
        assert_eq!(json["data"]["limits"]["post_max_size"], 128 * 1024 * 1024);
        assert_eq!(
            json["data"]["resources"]["storage_root"],
            dir.path().join("storage").display().to_string()
        );

        let req = test::TestRequest::post().uri("/api/cleanup").to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["expired_sessions"], 0);

        let req = test::TestRequest::get().uri("/api/stats").to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(json["data"]["chunks"]["entries"], 0);
        assert_eq!(json["data"]["total_requests"], 3);
    }
}
