use crate::app::CliApp;
use crate::utils::format_bytes;
use tracing::info;
use vault_core::backup::{FullBackupRequest, IncrementalBackupRequest};
use vault_core::error::Result;

/// 创建全量备份
pub async fn run_backup_full(
    app: &CliApp,
    tenant: Option<String>,
    compress: bool,
    verify: bool,
    retention_days: Option<i64>,
) -> Result<()> {
    info!("💾 创建全量备份");
    info!("===============");

    let mut req = FullBackupRequest::new(tenant);
    req.compress = compress;
    req.verify = verify;
    req.retention_days = retention_days;
    req.initiator = Some("cli".to_string());

    let outcome = app.backups.create_full_backup(req).await?;

    info!("✅ 备份完成");
    info!("   执行ID: {}", outcome.execution_id);
    info!("   状态: {}", outcome.status.as_str());
    if let Some(raw) = outcome.raw_size {
        info!("   原始大小: {}", format_bytes(raw));
    }
    if let Some(compressed) = outcome.compressed_size {
        info!("   压缩后: {}", format_bytes(compressed));
    }
    info!("   校验: {}", outcome.verification_status.as_str());
    Ok(())
}

/// 创建增量备份
pub async fn run_backup_incremental(
    app: &CliApp,
    tenant: Option<String>,
    base: Option<String>,
) -> Result<()> {
    info!("💾 创建增量备份");
    info!("===============");

    let mut req = IncrementalBackupRequest::new(tenant);
    req.base_id = base;
    req.initiator = Some("cli".to_string());

    let outcome = app.backups.create_incremental_backup(req).await?;

    info!("✅ 增量备份完成");
    info!("   执行ID: {}", outcome.execution_id);
    info!("   基础备份: {}", outcome.base_id);
    info!("   状态: {}", outcome.status.as_str());
    if let Some(changes) = outcome.changes_captured {
        info!("   捕获变更: {} 个文件", changes);
    }
    Ok(())
}

/// 列出备份
pub async fn run_backup_list(app: &CliApp, tenant: Option<String>) -> Result<()> {
    info!("📋 备份列表");
    info!("===========");

    let backups = app.store.list_backups(tenant).await?;
    if backups.is_empty() {
        info!("（暂无备份）");
        return Ok(());
    }

    for backup in &backups {
        let size = backup
            .attrs
            .raw_size
            .map(format_bytes)
            .unwrap_or_else(|| "-".to_string());
        info!(
            "   {} [{}] {} {} {}",
            backup.execution_id,
            backup.attrs.backup_type.as_str(),
            backup.attrs.status.as_str(),
            size,
            backup
                .attrs
                .started_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default()
        );
    }
    info!("共 {} 个备份", backups.len());
    Ok(())
}

/// 显示单个备份的版本历史
pub async fn run_backup_history(app: &CliApp, execution_id: &str) -> Result<()> {
    info!("📜 备份版本历史: {}", execution_id);
    info!("================");

    let history = app.store.backup_history(execution_id).await?;
    if history.is_empty() {
        info!("（没有找到该备份的任何版本）");
        return Ok(());
    }

    for version in &history {
        let closed = version
            .valid_to
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "（当前）".to_string());
        info!(
            "   v{} {} -> {}  状态: {}  校验: {}",
            version.version_id,
            version.valid_from.format("%Y-%m-%d %H:%M:%S"),
            closed,
            version.attrs.status.as_str(),
            version.attrs.verification_status.as_str()
        );
    }
    Ok(())
}
