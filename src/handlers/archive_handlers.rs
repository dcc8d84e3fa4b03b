use actix_web::{web, Error, HttpResponse};

use crate::models::{ApiResponse, ArchiveRequest};
use crate::state::AppState;

/// 表单提交完成后，把它引用的上传打包存入资源库。
pub async fn create_archive(
    state: web::Data<AppState>,
    info: web::Json<ArchiveRequest>,
) -> Result<HttpResponse, Error> {
    state.record_request();

    let info = info.into_inner();
    log::info!("收到归档请求: 表单 {} (模板 {}), {} 个上传", info.form_name, info.template_id, info.files.len());

    match state
        .archives
        .create_archive_asset(&info.files, &info.form_name, info.template_id)
        .await
    {
        Ok(Some(asset)) => Ok(HttpResponse::Ok().json(ApiResponse {
            success: true,
            message: "归档创建成功".to_string(),
            data: Some(asset),
        })),
        Ok(None) => Ok(HttpResponse::Ok().json(ApiResponse::<()> {
            success: true,
            message: "没有可打包的上传文件".to_string(),
            data: None,
        })),
        Err(err) => {
            state.record_error();
            log::error!("创建归档失败: {}", err);
            Err(err.into())
        }
    }
}
