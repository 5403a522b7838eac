use std::path::Path;

use tracing::{info, warn};
use vault_core::{VaultError, config::OrchestratorConfig, error::Result, store::StoreManager};

const CONFIG_FILE: &str = "config.toml";

/// 初始化客户端：生成默认配置文件并建好元数据库
pub async fn run_init(force: bool) -> Result<()> {
    info!("🦆 初始化备份编排环境");
    info!("=====================");

    if Path::new(CONFIG_FILE).exists() && !force {
        warn!("⚠️  配置文件 {} 已存在", CONFIG_FILE);
        info!("💡 如需覆盖请使用 --force");
        return Err(VaultError::validation(format!(
            "配置文件 {CONFIG_FILE} 已存在"
        )));
    }

    let config = OrchestratorConfig::default();
    let content = toml::to_string_pretty(&config)
        .map_err(|e| VaultError::custom(format!("序列化默认配置失败: {e}")))?;
    std::fs::write(CONFIG_FILE, content)?;
    info!("✅ 已写入默认配置: {}", CONFIG_FILE);

    config.ensure_storage_dirs()?;
    info!("✅ 备份产物目录就绪: {}", config.storage.storage_root);

    // 建表发生在StoreManager初始化时
    let _store = StoreManager::new(&config.database.db_path).await?;
    info!("✅ 元数据库就绪: {}", config.database.db_path);

    info!("🎉 初始化完成，可以开始创建备份了");
    Ok(())
}
