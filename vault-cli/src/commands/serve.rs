use crate::app::CliApp;
use std::sync::Arc;
use tracing::info;
use vault_core::error::Result;

/// 前台运行调度驱动器，Ctrl+C退出
pub async fn run_serve(app: &CliApp) -> Result<()> {
    info!("🚀 启动调度驱动器");
    info!("=================");
    info!("按 Ctrl+C 停止");

    let driver = Arc::new(app.build_driver());
    let shutdown = driver.shutdown_token();

    let handle = tokio::spawn({
        let driver = driver.clone();
        async move { driver.run().await }
    });

    tokio::signal::ctrl_c().await?;
    info!("收到停机信号，等待驱动器退出...");
    shutdown.cancel();
    let _ = handle.await;

    info!("✅ 调度驱动器已停止");
    Ok(())
}
