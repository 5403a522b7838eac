use crate::{
    VaultError,
    config::OrchestratorConfig,
    constants::recovery as defaults,
    engine::BackupEngine,
    error::Result,
    events::{AuditEvent, AuditSink, emit},
    keys::{self, EntityKind},
    store::{RecoveryStatus, RecoveryType, RecoveryVersionAttrs, StoreManager},
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// 恢复管理器
///
/// 恢复走两段式：先发起（选定来源备份、确定是否需要审批），
/// 审批通过后才允许执行真正的数据搬运。
#[derive(Clone)]
pub struct RecoveryManager {
    store: StoreManager,
    engine: Arc<dyn BackupEngine>,
    audit: Arc<dyn AuditSink>,
    config: OrchestratorConfig,
}

/// 时间点恢复请求
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub tenant: Option<String>,
    /// 要恢复到的目标时间点
    pub target_timestamp: DateTime<Utc>,
    /// 恢复目标的描述（库名、目录等）
    pub recovery_target: String,
    pub initiator: Option<String>,
    /// 是否需要人工审批后才能执行
    pub approval_required: bool,
}

/// 发起恢复的结果
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub recovery_id: String,
    pub status: RecoveryStatus,
    /// 选定的来源备份（恢复下限）
    pub source_backup_id: String,
    pub estimated_duration_secs: i64,
}

/// 执行恢复的结果
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub recovery_id: String,
    pub status: RecoveryStatus,
    pub records_recovered: Option<i64>,
    pub bytes_recovered: Option<i64>,
}

impl RecoveryManager {
    pub fn new(
        store: StoreManager,
        engine: Arc<dyn BackupEngine>,
        audit: Arc<dyn AuditSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            audit,
            config,
        }
    }

    /// 发起时间点恢复
    ///
    /// 恢复下限：开始时间不晚于目标时间点的最新已完成备份
    /// （只考虑全量和增量）。找不到时返回NoSuitableBackup。
    pub async fn initiate_point_in_time_recovery(
        &self,
        req: RecoveryRequest,
    ) -> Result<RecoveryOutcome> {
        let now = Utc::now();

        let floor = self
            .store
            .recovery_floor(req.tenant.clone(), req.target_timestamp)
            .await?
            .ok_or_else(|| VaultError::NoSuitableBackup {
                target: req.target_timestamp.to_rfc3339(),
            })?;
        let source_backup_id = floor.execution_id.clone();

        let recovery_id = keys::derive_id(
            EntityKind::Recovery,
            req.tenant.as_deref(),
            now,
            Some(&Uuid::new_v4().to_string()),
        );
        self.store
            .create_recovery_entity(&recovery_id, req.tenant.clone(), now)
            .await?;

        // 免审批的恢复直接进入APPROVED，可立即执行
        let status = if req.approval_required {
            RecoveryStatus::Pending
        } else {
            RecoveryStatus::Approved
        };

        let attrs = RecoveryVersionAttrs {
            recovery_type: RecoveryType::PointInTime,
            source_backup_id: source_backup_id.clone(),
            target_timestamp: Some(req.target_timestamp),
            recovery_target: req.recovery_target.clone(),
            started_at: None,
            finished_at: None,
            status,
            validation_outcome: None,
            records_recovered: None,
            bytes_recovered: None,
            success_rate: None,
            error_message: None,
            initiator: req.initiator.clone(),
            approval_required: req.approval_required,
            approved_by: None,
            approved_at: if req.approval_required { None } else { Some(now) },
            estimated_duration_secs: Some(defaults::ESTIMATED_DURATION_SECS),
        };

        self.store
            .append_recovery_version(&recovery_id, now, attrs)
            .await?;
        self.store
            .add_recovery_link(&recovery_id, &source_backup_id, now)
            .await?;
        self.audit_transition(&recovery_id, &req.tenant, None, status)
            .await;

        info!(
            recovery_id = %recovery_id,
            source_backup_id = %source_backup_id,
            status = status.as_str(),
            "已发起时间点恢复，目标时间点: {}",
            req.target_timestamp
        );

        Ok(RecoveryOutcome {
            recovery_id,
            status,
            source_backup_id,
            estimated_duration_secs: defaults::ESTIMATED_DURATION_SECS,
        })
    }

    /// 审批恢复操作
    ///
    /// 只有PENDING状态的恢复可以审批。
    pub async fn approve_recovery(&self, recovery_id: &str, approver: &str) -> Result<()> {
        let now = Utc::now();
        let current = self
            .store
            .current_recovery(recovery_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("恢复操作 {recovery_id}")))?;

        if current.attrs.status != RecoveryStatus::Pending {
            return Err(VaultError::validation(format!(
                "恢复操作 {recovery_id} 状态为 {}，只有PENDING可以审批",
                current.attrs.status.as_str()
            )));
        }

        let mut attrs = current.attrs;
        attrs.status = RecoveryStatus::Approved;
        attrs.approved_by = Some(approver.to_string());
        attrs.approved_at = Some(now);

        self.store
            .append_recovery_version(recovery_id, now, attrs)
            .await?;
        self.audit_transition(
            recovery_id,
            &None,
            Some(RecoveryStatus::Pending),
            RecoveryStatus::Approved,
        )
        .await;

        info!(recovery_id = %recovery_id, approver = %approver, "恢复操作审批通过");
        Ok(())
    }

    /// 执行已审批的恢复
    ///
    /// 从来源备份的产物恢复到目标目录。不论引擎成败，
    /// 恢复操作都会到达终态（COMPLETED或FAILED）。
    pub async fn execute_recovery(
        &self,
        recovery_id: &str,
        target_dir: Option<PathBuf>,
    ) -> Result<RestoreOutcome> {
        let started_at = Utc::now();
        let current = self
            .store
            .current_recovery(recovery_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("恢复操作 {recovery_id}")))?;

        if current.attrs.status != RecoveryStatus::Approved {
            return Err(VaultError::validation(format!(
                "恢复操作 {recovery_id} 状态为 {}，只有APPROVED可以执行",
                current.attrs.status.as_str()
            )));
        }

        // 定位来源备份的产物位置
        let source_backup_id = current.attrs.source_backup_id.clone();
        let source = self
            .store
            .current_backup(&source_backup_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("来源备份 {source_backup_id}")))?;
        let artifact = source
            .attrs
            .storage_location
            .clone()
            .ok_or_else(|| {
                VaultError::validation(format!("来源备份 {source_backup_id} 没有产物位置"))
            })?;

        let mut attrs = current.attrs;
        attrs.status = RecoveryStatus::Running;
        attrs.started_at = Some(started_at);
        self.store
            .append_recovery_version(recovery_id, started_at, attrs.clone())
            .await?;
        self.audit_transition(
            recovery_id,
            &None,
            Some(RecoveryStatus::Approved),
            RecoveryStatus::Running,
        )
        .await;

        let target = target_dir.unwrap_or_else(|| {
            self.config
                .get_data_root()
                .join(format!("restore_{}", recovery_id))
        });

        info!(
            recovery_id = %recovery_id,
            "开始执行恢复: {} -> {}",
            artifact,
            target.display()
        );

        match self.engine.restore(Path::new(&artifact), &target).await {
            Ok(report) => {
                let finished_at = Utc::now();
                attrs.status = RecoveryStatus::Completed;
                attrs.finished_at = Some(finished_at);
                attrs.records_recovered = Some(report.records_recovered as i64);
                attrs.bytes_recovered = Some(report.bytes_recovered as i64);
                attrs.success_rate = Some(100.0);
                attrs.validation_outcome = Some("PASSED".to_string());

                self.store
                    .append_recovery_version(recovery_id, finished_at, attrs)
                    .await?;
                self.audit_transition(
                    recovery_id,
                    &None,
                    Some(RecoveryStatus::Running),
                    RecoveryStatus::Completed,
                )
                .await;

                info!(
                    recovery_id = %recovery_id,
                    records = report.records_recovered,
                    "恢复执行完成"
                );

                Ok(RestoreOutcome {
                    recovery_id: recovery_id.to_string(),
                    status: RecoveryStatus::Completed,
                    records_recovered: Some(report.records_recovered as i64),
                    bytes_recovered: Some(report.bytes_recovered as i64),
                })
            }
            Err(e) => {
                let finished_at = Utc::now();
                error!(recovery_id = %recovery_id, "恢复执行失败: {}", e);

                attrs.status = RecoveryStatus::Failed;
                attrs.finished_at = Some(finished_at);
                attrs.error_message = Some(e.to_string());
                attrs.success_rate = Some(0.0);

                self.store
                    .append_recovery_version(recovery_id, finished_at, attrs)
                    .await?;
                self.audit_transition(
                    recovery_id,
                    &None,
                    Some(RecoveryStatus::Running),
                    RecoveryStatus::Failed,
                )
                .await;
                Err(e)
            }
        }
    }

    async fn audit_transition(
        &self,
        recovery_id: &str,
        tenant: &Option<String>,
        from: Option<RecoveryStatus>,
        to: RecoveryStatus,
    ) {
        emit(
            self.audit.as_ref(),
            AuditEvent {
                entity_kind: "recovery_operation",
                entity_id: recovery_id.to_string(),
                tenant: tenant.clone(),
                from_status: from.map(|s| s.as_str().to_string()),
                to_status: to.as_str().to_string(),
                at: Utc::now(),
                detail: None,
            },
        )
        .await;
    }
}
