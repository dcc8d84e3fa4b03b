mod config;
mod error;
mod models;

mod state;
mod handlers;
mod utils;
pub mod services;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::io::Result;

#[actix_web::main]
async fn main() -> Result<()> {
    // 初始化日志
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 初始化配置
    let config = config::ServerConfig::new();
    config.init_directories().await?;

    state::SERVER_START_TIME.store(
        chrono::Utc::now().timestamp() as u64,
        std::sync::atomic::Ordering::Relaxed,
    );

    // 创建应用状态
    let app_state = state::AppState::new(config.clone());
    if let Err(err) = app_state.uploads.validator().check_server_limits() {
        log::error!("配置检查未通过，所有上传都会被拒绝: {}", err);
    }

    // 启动后台清理任务
    tokio::spawn(services::cleanup_service::start_background_cleanup(config.clone()));

    log::info!("启动表单上传服务...");
    config.log_config();
    println!("服务器运行在：http://{}:{}", config.address, config.port);

    let asset_root = config.asset_root.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Logger::default())
            .configure(handlers::configure_routes)
            .configure(|cfg| handlers::configure_assets(cfg, &asset_root))
    })
    .bind(format!("{}:{}", config.address, config.port))?
    .run();

    // 设置优雅关闭
    let server_handle = server.handle();
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("无法监听 CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("接收到关闭信号");
    };

    tokio::select! {
        _ = server => {
            log::info!("服务器正常退出");
        }
        _ = shutdown_signal => {
            log::info!("开始优雅关闭流程");
            server_handle.stop(true).await;
            services::cleanup_service::graceful_shutdown(&config).await;
            log::info!("优雅关闭完成");
        }
    }

    Ok(())
}
