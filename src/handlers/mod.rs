pub mod archive_handlers;
pub mod system_handlers;
pub mod upload_handlers;

use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(system_handlers::health_check))
            .route("/stats", web::get().to(system_handlers::get_stats))
            .route("/cleanup", web::post().to(system_handlers::run_cleanup))
            .route("/upload", web::post().to(upload_handlers::upload_file))
            .route("/upload/done", web::post().to(upload_handlers::combine_chunks))
            .route("/upload/{uuid}", web::get().to(upload_handlers::inspect_upload))
            .route("/upload/{uuid}", web::delete().to(upload_handlers::delete_upload))
            .route("/archive", web::post().to(archive_handlers::create_archive)),
    );
}

// 资源库目录只读暴露，不开目录列表
pub fn configure_assets(cfg: &mut web::ServiceConfig, asset_root: &std::path::Path) {
    cfg.service(
        actix_files::Files::new("/assets", asset_root)
            .use_last_modified(true)
            .prefer_utf8(true),
    );
}
