use std::sync::Arc;

use vault_core::{
    backup::BackupExecutionManager,
    config::OrchestratorConfig,
    engine::{BackupEngine, LocalArchiveEngine},
    error::Result,
    events::{AuditSink, Notifier, TracingAuditSink, TracingNotifier},
    recovery::RecoveryManager,
    retention::RetentionSweeper,
    scheduler::ScheduleManager,
    store::StoreManager,
    verify::Verifier,
    worker::SchedulerDriver,
};

use crate::cli::{BackupCommand, Commands, RecoveryCommand, ScheduleCommand};
use crate::commands;

/// CLI应用：配置加载与各管理器的装配
#[derive(Clone)]
pub struct CliApp {
    pub config: OrchestratorConfig,
    pub store: StoreManager,
    pub backups: BackupExecutionManager,
    pub recovery: RecoveryManager,
    pub schedules: ScheduleManager,
    pub sweeper: RetentionSweeper,
    pub verifier: Verifier,
    notifier: Arc<dyn Notifier>,
}

impl CliApp {
    /// 使用智能配置查找初始化CLI应用
    pub async fn new_with_auto_config() -> Result<Self> {
        let config = OrchestratorConfig::find_and_load_config()?;

        // 确保备份产物目录存在
        config.ensure_storage_dirs()?;

        // 初始化元数据库（建表在内部完成）
        let store = StoreManager::new(&config.database.db_path).await?;

        let engine: Arc<dyn BackupEngine> = Arc::new(LocalArchiveEngine::new());
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

        let backups = BackupExecutionManager::new(
            store.clone(),
            engine.clone(),
            audit.clone(),
            config.clone(),
        );
        let recovery = RecoveryManager::new(
            store.clone(),
            engine.clone(),
            audit.clone(),
            config.clone(),
        );
        let schedules = ScheduleManager::new(store.clone());
        let sweeper = RetentionSweeper::new(store.clone(), audit.clone());
        let verifier = Verifier::new(store.clone(), engine, audit);

        Ok(Self {
            config,
            store,
            backups,
            recovery,
            schedules,
            sweeper,
            verifier,
            notifier,
        })
    }

    /// 运行应用命令
    pub async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Backup(cmd) => match cmd {
                BackupCommand::Full {
                    tenant,
                    no_compress,
                    no_verify,
                    retention_days,
                } => {
                    commands::run_backup_full(self, tenant, !no_compress, !no_verify, retention_days)
                        .await
                }
                BackupCommand::Incremental { tenant, base } => {
                    commands::run_backup_incremental(self, tenant, base).await
                }
                BackupCommand::List { tenant } => commands::run_backup_list(self, tenant).await,
                BackupCommand::History { execution_id } => {
                    commands::run_backup_history(self, &execution_id).await
                }
            },
            Commands::Recovery(cmd) => match cmd {
                RecoveryCommand::Initiate {
                    target,
                    tenant,
                    into,
                    require_approval,
                } => {
                    commands::run_recovery_initiate(self, &target, tenant, into, require_approval)
                        .await
                }
                RecoveryCommand::Approve {
                    recovery_id,
                    approver,
                } => commands::run_recovery_approve(self, &recovery_id, &approver).await,
                RecoveryCommand::Execute {
                    recovery_id,
                    target_dir,
                } => commands::run_recovery_execute(self, &recovery_id, target_dir).await,
            },
            Commands::Schedule(cmd) => match cmd {
                ScheduleCommand::Create {
                    name,
                    backup_type,
                    cadence,
                    tenant,
                    retention_days,
                    notify_on_success,
                } => {
                    commands::run_schedule_create(
                        self,
                        name,
                        &backup_type,
                        cadence,
                        tenant,
                        retention_days,
                        notify_on_success,
                    )
                    .await
                }
                ScheduleCommand::List => commands::run_schedule_list(self).await,
                ScheduleCommand::Due { lookahead_secs } => {
                    commands::run_schedule_due(self, lookahead_secs).await
                }
                ScheduleCommand::SetActive {
                    schedule_id,
                    active,
                } => commands::run_schedule_set_active(self, &schedule_id, active).await,
            },
            Commands::Sweep { tenant, dry_run } => commands::run_sweep(self, tenant, dry_run).await,
            Commands::Verify { execution_id } => commands::run_verify(self, &execution_id).await,
            Commands::Serve => commands::run_serve(self).await,
        }
    }

    /// 装配调度驱动器（serve命令使用）
    pub fn build_driver(&self) -> SchedulerDriver {
        SchedulerDriver::new(
            self.schedules.clone(),
            self.backups.clone(),
            self.notifier.clone(),
            self.config.scheduler.clone(),
        )
    }
}
