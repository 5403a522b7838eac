use crate::app::CliApp;
use crate::utils::format_bytes;
use tracing::info;
use vault_core::error::Result;

/// 扫描并过期超出保留期的备份
pub async fn run_sweep(app: &CliApp, tenant: Option<String>, dry_run: bool) -> Result<()> {
    if dry_run {
        info!("🧹 保留策略扫描（演练模式）");
    } else {
        info!("🧹 保留策略扫描");
    }
    info!("================");

    let report = app
        .sweeper
        .sweep_expired(tenant, dry_run, Some("cli".to_string()))
        .await?;

    if report.actions.is_empty() {
        info!("✅ 没有超出保留期的备份");
        return Ok(());
    }

    for action in &report.actions {
        info!(
            "   {} [{}] {} {}",
            action.execution_id,
            action.action.as_str(),
            action.file_name.as_deref().unwrap_or("-"),
            format_bytes(action.reclaimed_bytes)
        );
    }

    info!(
        "✅ 扫描完成: 过期 {} 个，保护 {} 个，可回收 {}",
        report.expired_count,
        report.retained_count,
        format_bytes(report.reclaimed_bytes)
    );
    if report.retained_count > 0 {
        info!("💡 被保护的备份仍有存活的增量依赖，先清理依赖方");
    }
    Ok(())
}
