use backuptools::{app_config_dir, logging, AppState};

#[tokio::main]
async fn main() {
    let config_dir = app_config_dir();
    let _ = std::fs::create_dir_all(&config_dir);

    // 初始化日志系统
    logging::init(&config_dir);

    let state = match AppState::new() {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("初始化失败: {:#}", e);
            std::process::exit(1);
        }
    };

    state.start();
    tracing::info!("backuptools 服务已启动, 配置目录: {}", config_dir.display());

    // 等待 Ctrl-C 退出
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("等待退出信号失败: {}", e);
    }

    state.cleanup().await;
}
