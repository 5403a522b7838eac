use crate::app::CliApp;
use crate::utils::format_bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::info;
use vault_core::error::Result;
use vault_core::recovery::RecoveryRequest;
use vault_core::store::RecoveryStatus;
use vault_core::VaultError;

/// 发起时间点恢复
pub async fn run_recovery_initiate(
    app: &CliApp,
    target: &str,
    tenant: Option<String>,
    recovery_target: String,
    require_approval: bool,
) -> Result<()> {
    info!("🔄 发起时间点恢复");
    info!("=================");

    let target_timestamp = target
        .parse::<DateTime<Utc>>()
        .map_err(|_| VaultError::validation(format!("无效的目标时间点: {target}")))?;

    let outcome = app
        .recovery
        .initiate_point_in_time_recovery(RecoveryRequest {
            tenant,
            target_timestamp,
            recovery_target,
            initiator: Some("cli".to_string()),
            approval_required: require_approval,
        })
        .await?;

    info!("✅ 恢复已发起");
    info!("   恢复ID: {}", outcome.recovery_id);
    info!("   来源备份: {}", outcome.source_backup_id);
    info!("   状态: {}", outcome.status.as_str());
    info!("   预计耗时: {} 秒", outcome.estimated_duration_secs);
    if outcome.status == RecoveryStatus::Pending {
        info!("💡 该恢复需要审批，请运行:");
        info!(
            "   vault-cli recovery approve {} --approver <名字>",
            outcome.recovery_id
        );
    }
    Ok(())
}

/// 审批恢复
pub async fn run_recovery_approve(app: &CliApp, recovery_id: &str, approver: &str) -> Result<()> {
    app.recovery.approve_recovery(recovery_id, approver).await?;
    info!("✅ 恢复 {} 已由 {} 审批通过", recovery_id, approver);
    info!("💡 执行恢复: vault-cli recovery execute {}", recovery_id);
    Ok(())
}

/// 执行恢复
pub async fn run_recovery_execute(
    app: &CliApp,
    recovery_id: &str,
    target_dir: Option<PathBuf>,
) -> Result<()> {
    info!("🔄 执行恢复: {}", recovery_id);
    info!("=============");

    let outcome = app.recovery.execute_recovery(recovery_id, target_dir).await?;

    info!("✅ 恢复完成");
    info!("   状态: {}", outcome.status.as_str());
    if let Some(records) = outcome.records_recovered {
        info!("   恢复条目: {}", records);
    }
    if let Some(bytes) = outcome.bytes_recovered {
        info!("   恢复数据量: {}", format_bytes(bytes));
    }
    Ok(())
}
