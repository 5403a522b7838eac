use crate::app::CliApp;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;
use vault_core::VaultError;
use vault_core::error::Result;
use vault_core::scheduler::CreateScheduleRequest;
use vault_core::store::BackupType;

fn parse_backup_type(s: &str) -> Result<BackupType> {
    match s.to_ascii_lowercase().as_str() {
        "full" => Ok(BackupType::Full),
        "incremental" => Ok(BackupType::Incremental),
        "differential" => Ok(BackupType::Differential),
        other => Err(VaultError::validation(format!(
            "无效的备份类型 '{other}'，支持 full / incremental / differential"
        ))),
    }
}

/// 创建调度
pub async fn run_schedule_create(
    app: &CliApp,
    name: String,
    backup_type: &str,
    cadence: String,
    tenant: Option<String>,
    retention_days: Option<i64>,
    notify_on_success: bool,
) -> Result<()> {
    let backup_type = parse_backup_type(backup_type)?;

    let mut req = CreateScheduleRequest::new(name.clone(), backup_type, cadence);
    req.tenant = tenant;
    req.retention_days = retention_days;
    req.notify_on_success = notify_on_success;

    let schedule_id = app.schedules.create_schedule(req).await?;

    info!("✅ 调度已创建");
    info!("   名称: {}", name);
    info!("   调度ID: {}", schedule_id);
    info!("💡 运行 vault-cli serve 启动调度驱动器");
    Ok(())
}

/// 列出调度
pub async fn run_schedule_list(app: &CliApp) -> Result<()> {
    info!("📋 调度列表");
    info!("===========");

    let schedules = app.schedules.list_schedules().await?;
    if schedules.is_empty() {
        info!("（暂无调度）");
        return Ok(());
    }

    for schedule in &schedules {
        let state = if schedule.attrs.is_active {
            "活跃"
        } else {
            "停用"
        };
        info!(
            "   {} [{}] {} {} 下次: {}  已运行 {} 次",
            schedule.schedule_id,
            schedule.attrs.backup_type.as_str(),
            schedule.attrs.name,
            state,
            schedule
                .attrs
                .next_run_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            schedule.attrs.run_count
        );
    }
    Ok(())
}

/// 查看前瞻窗口内到期的调度
pub async fn run_schedule_due(app: &CliApp, lookahead_secs: Option<u64>) -> Result<()> {
    let lookahead = lookahead_secs.unwrap_or(app.config.scheduler.lookahead_secs);
    let due = app
        .schedules
        .due_schedules(
            Utc::now(),
            ChronoDuration::seconds(lookahead as i64),
            app.config.scheduler.due_limit,
        )
        .await?;

    info!("⏰ 未来 {} 秒内到期的调度: {} 个", lookahead, due.len());
    for schedule in &due {
        info!(
            "   {} [{}] {} 到期: {}",
            schedule.name,
            schedule.backup_type.as_str(),
            schedule
                .tenant
                .as_deref()
                .unwrap_or("system"),
            schedule.next_run_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// 启用或停用调度
pub async fn run_schedule_set_active(app: &CliApp, schedule_id: &str, active: bool) -> Result<()> {
    app.schedules.set_active(schedule_id, active).await?;
    if active {
        info!("✅ 调度 {} 已启用", schedule_id);
    } else {
        info!("⏸️  调度 {} 已停用", schedule_id);
    }
    Ok(())
}
