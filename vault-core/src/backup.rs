use crate::{
    VaultError,
    config::OrchestratorConfig,
    constants::backup as defaults,
    engine::{BackupEngine, EngineReport, EngineSpec},
    error::Result,
    events::{AuditEvent, AuditSink, emit},
    keys::{self, EntityKind},
    store::{
        BackupScope, BackupType, BackupVersionAttrs, ExecutionStatus, StoreManager,
        VerificationStatus,
    },
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 备份执行管理器
///
/// 负责全量/增量备份的编排：打开RUNNING版本、调用外部备份引擎、
/// 采集指标并落到终态版本。任何一次执行尝试都必须到达终态，
/// 不允许版本无限期保持开放。
#[derive(Clone)]
pub struct BackupExecutionManager {
    store: StoreManager,
    engine: Arc<dyn BackupEngine>,
    audit: Arc<dyn AuditSink>,
    config: OrchestratorConfig,
}

/// 全量备份请求
#[derive(Debug, Clone)]
pub struct FullBackupRequest {
    /// 租户范围（None表示系统级）
    pub tenant: Option<String>,
    /// 产物写入路径（None时按约定生成）
    pub destination: Option<PathBuf>,
    pub storage_class: Option<String>,
    pub compress: bool,
    /// 完成后是否同步校验
    pub verify: bool,
    pub initiator: Option<String>,
    pub retention_days: Option<i64>,
    /// 引擎调用的硬超时（None时取配置默认）
    pub max_duration: Option<Duration>,
    /// 调度派发的逻辑时槽：相同时槽的重复请求派生相同ID，幂等去重
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl FullBackupRequest {
    pub fn new(tenant: Option<String>) -> Self {
        Self {
            tenant,
            destination: None,
            storage_class: None,
            compress: true,
            verify: true,
            initiator: None,
            retention_days: None,
            max_duration: None,
            scheduled_for: None,
        }
    }
}

/// 增量/差异备份请求
#[derive(Debug, Clone)]
pub struct IncrementalBackupRequest {
    pub tenant: Option<String>,
    /// INCREMENTAL或DIFFERENTIAL，两者都基于最近的全量备份
    pub backup_type: BackupType,
    /// 基础备份ID（None时自动解析为最近的已完成全量备份）
    pub base_id: Option<String>,
    pub destination: Option<PathBuf>,
    pub initiator: Option<String>,
    pub retention_days: Option<i64>,
    pub max_duration: Option<Duration>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl IncrementalBackupRequest {
    pub fn new(tenant: Option<String>) -> Self {
        Self {
            tenant,
            backup_type: BackupType::Incremental,
            base_id: None,
            destination: None,
            initiator: None,
            retention_days: None,
            max_duration: None,
            scheduled_for: None,
        }
    }
}

/// 备份操作的结果摘要
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub raw_size: Option<i64>,
    pub compressed_size: Option<i64>,
    pub duration_secs: Option<i64>,
    pub verification_status: VerificationStatus,
}

/// 增量备份的结果摘要
#[derive(Debug, Clone)]
pub struct IncrementalOutcome {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub base_id: String,
    pub raw_size: Option<i64>,
    pub changes_captured: Option<i64>,
}

impl BackupExecutionManager {
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

    /// 创建全量备份
    pub async fn create_full_backup(&self, req: FullBackupRequest) -> Result<BackupOutcome> {
        let started_at = Utc::now();
        let (execution_id, created) = self
            .open_execution(&req.tenant, req.scheduled_for, started_at)
            .await?;

        if !created {
            // 相同逻辑时槽的重复派发：返回已有执行的现状，不再拉起新任务
            info!(execution_id = %execution_id, "相同时槽的备份已存在，幂等返回");
            let current = self
                .store
                .current_backup(&execution_id)
                .await?
                .ok_or_else(|| VaultError::not_found(format!("备份执行 {execution_id}")))?;
            return Ok(BackupOutcome {
                execution_id,
                status: current.attrs.status,
                raw_size: current.attrs.raw_size,
                compressed_size: current.attrs.compressed_size,
                duration_secs: current.attrs.duration_secs,
                verification_status: current.attrs.verification_status,
            });
        }

        let destination = self.resolve_destination(&req.destination, "full", &req.tenant, started_at);
        let retention_days = req
            .retention_days
            .unwrap_or(self.config.storage.default_retention_days);

        let mut attrs = self.running_attrs(BackupType::Full, &req, started_at);
        attrs.storage_class = Some(
            req.storage_class
                .clone()
                .unwrap_or_else(|| self.config.storage.storage_class.clone()),
        );
        attrs.retention_days = Some(retention_days);
        attrs.file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        self.store
            .append_backup_version(&execution_id, started_at, attrs.clone())
            .await?;
        self.audit_transition(&execution_id, &req.tenant, None, ExecutionStatus::Running)
            .await;

        info!(execution_id = %execution_id, "开始创建全量备份: {}", destination.display());

        let spec = EngineSpec {
            source_dirs: vec![self.config.get_data_root()],
            destination: destination.clone(),
            compress: req.compress,
            compression_level: 6,
            since: None,
        };

        let (engine_result, retries_used) = self
            .invoke_engine_with_retry(&spec, req.max_duration)
            .await;

        match engine_result {
            Ok(report) => {
                let finished_at = Utc::now();
                let mut terminal =
                    self.completed_attrs(attrs, &report, req.compress, started_at, finished_at);
                terminal.retry_count = retries_used as i32;
                terminal.retention_days = Some(retention_days);
                terminal.retention_policy = Some(defaults::DEFAULT_RETENTION_POLICY.to_string());
                terminal.expires_at = Some(started_at + ChronoDuration::days(retention_days));

                // 按请求同步校验产物
                if req.verify {
                    let verified = self.verify_fresh_artifact(&destination, &report).await;
                    terminal.verification_status = if verified {
                        VerificationStatus::Verified
                    } else {
                        VerificationStatus::Failed
                    };
                    terminal.integrity_verified = verified;
                    terminal.verified_at = Some(finished_at);
                } else {
                    terminal.verification_status = VerificationStatus::Skipped;
                }

                let status = terminal.status;
                let verification_status = terminal.verification_status;
                let raw_size = terminal.raw_size;
                let compressed_size = terminal.compressed_size;
                let duration_secs = terminal.duration_secs;

                self.store
                    .append_backup_version(&execution_id, finished_at, terminal)
                    .await?;
                self.audit_transition(&execution_id, &req.tenant, Some(ExecutionStatus::Running), status)
                    .await;

                info!(execution_id = %execution_id, status = status.as_str(), "全量备份完成");

                Ok(BackupOutcome {
                    execution_id,
                    status,
                    raw_size,
                    compressed_size,
                    duration_secs,
                    verification_status,
                })
            }
            Err(e) => {
                self.close_out_failed(&execution_id, &req.tenant, attrs, started_at, retries_used, &e)
                    .await?;
                Err(e)
            }
        }
    }

    /// 创建增量备份
    ///
    /// 前置条件：租户必须已有至少一次成功的全量备份。
    pub async fn create_incremental_backup(
        &self,
        req: IncrementalBackupRequest,
    ) -> Result<IncrementalOutcome> {
        let started_at = Utc::now();

        if !req.backup_type.needs_base() {
            return Err(VaultError::validation(format!(
                "备份类型 {} 不能走增量路径",
                req.backup_type.as_str()
            )));
        }

        // 先解析基础备份，再创建任何状态（校验失败不留半截记录）
        let base = self.resolve_base(&req).await?;
        let base_id = base.execution_id.clone();
        let base_started_at = base.attrs.started_at;

        let (execution_id, created) = self
            .open_execution(&req.tenant, req.scheduled_for, started_at)
            .await?;

        if !created {
            info!(execution_id = %execution_id, "相同时槽的增量备份已存在，幂等返回");
            let current = self
                .store
                .current_backup(&execution_id)
                .await?
                .ok_or_else(|| VaultError::not_found(format!("备份执行 {execution_id}")))?;
            return Ok(IncrementalOutcome {
                execution_id,
                status: current.attrs.status,
                base_id,
                raw_size: current.attrs.raw_size,
                changes_captured: None,
            });
        }

        if execution_id == base_id {
            // 派生ID理论上不会撞上基础备份，真撞上说明调用序列出了编程错误
            return Err(VaultError::SelfDependency(execution_id));
        }

        let kind = req.backup_type.as_str().to_lowercase();
        let destination = self.resolve_destination(&req.destination, &kind, &req.tenant, started_at);
        let retention_days = req
            .retention_days
            .unwrap_or(self.config.storage.default_retention_days);

        let mut attrs = BackupVersionAttrs::running(
            req.backup_type,
            self.scope_of(&req.tenant),
            started_at,
            req.initiator.clone(),
            self.config.retry.max_retries as i32,
        );
        attrs.method = Some("archive".to_string());
        attrs.retention_days = Some(retention_days);
        attrs.file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        self.store
            .append_backup_version(&execution_id, started_at, attrs.clone())
            .await?;
        self.store
            .add_dependency(&base_id, &execution_id, req.tenant.clone(), started_at)
            .await?;
        self.audit_transition(&execution_id, &req.tenant, None, ExecutionStatus::Running)
            .await;

        info!(
            execution_id = %execution_id,
            base_id = %base_id,
            "开始创建增量备份: {}",
            destination.display()
        );

        let spec = EngineSpec {
            source_dirs: vec![self.config.get_data_root()],
            destination: destination.clone(),
            compress: true,
            compression_level: 6,
            since: base_started_at,
        };

        let (engine_result, retries_used) = self
            .invoke_engine_with_retry(&spec, req.max_duration)
            .await;

        match engine_result {
            Ok(report) => {
                let finished_at = Utc::now();
                let changes = report.changes_captured.map(|c| c as i64);
                let mut terminal =
                    self.completed_attrs(attrs, &report, true, started_at, finished_at);
                terminal.retry_count = retries_used as i32;
                terminal.retention_policy = Some(defaults::DEFAULT_RETENTION_POLICY.to_string());
                terminal.expires_at = Some(started_at + ChronoDuration::days(retention_days));
                terminal.verification_status = VerificationStatus::Skipped;
                if let Some(changes) = changes {
                    terminal.metadata =
                        Some(serde_json::json!({ "changes_captured": changes }).to_string());
                }

                let status = terminal.status;
                let raw_size = terminal.raw_size;

                self.store
                    .append_backup_version(&execution_id, finished_at, terminal)
                    .await?;
                self.audit_transition(&execution_id, &req.tenant, Some(ExecutionStatus::Running), status)
                    .await;

                info!(execution_id = %execution_id, status = status.as_str(), "增量备份完成");

                Ok(IncrementalOutcome {
                    execution_id,
                    status,
                    base_id,
                    raw_size,
                    changes_captured: changes,
                })
            }
            Err(e) => {
                self.close_out_failed(&execution_id, &req.tenant, attrs, started_at, retries_used, &e)
                    .await?;
                Err(e)
            }
        }
    }

    // ========== 内部辅助 ==========

    /// 派生执行ID并创建身份，返回(id, 是否新建)
    async fn open_execution(
        &self,
        tenant: &Option<String>,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(String, bool)> {
        // 调度时槽内不加salt，重复派发收敛到同一身份；
        // 手工触发加随机salt，每次请求都是新执行。
        let (timestamp, salt) = match scheduled_for {
            Some(slot) => (slot, None),
            None => (now, Some(Uuid::new_v4().to_string())),
        };
        let id = keys::derive_id(
            EntityKind::Backup,
            tenant.as_deref(),
            timestamp,
            salt.as_deref(),
        );
        let created = self
            .store
            .create_backup_entity(&id, tenant.clone(), now)
            .await?;
        Ok((id, created))
    }

    fn scope_of(&self, tenant: &Option<String>) -> BackupScope {
        if tenant.is_some() {
            BackupScope::Tenant
        } else {
            BackupScope::System
        }
    }

    fn running_attrs(
        &self,
        backup_type: BackupType,
        req: &FullBackupRequest,
        started_at: DateTime<Utc>,
    ) -> BackupVersionAttrs {
        let mut attrs = BackupVersionAttrs::running(
            backup_type,
            self.scope_of(&req.tenant),
            started_at,
            req.initiator.clone(),
            self.config.retry.max_retries as i32,
        );
        attrs.method = Some("archive".to_string());
        attrs
    }

    /// 生成备份文件路径（人类易读格式）
    fn resolve_destination(
        &self,
        explicit: &Option<PathBuf>,
        kind: &str,
        tenant: &Option<String>,
        at: DateTime<Utc>,
    ) -> PathBuf {
        if let Some(dest) = explicit {
            return dest.clone();
        }
        let timestamp = at.format("%Y-%m-%d_%H-%M-%S");
        let scope = tenant.as_deref().unwrap_or("system");
        let file_name = format!("backup_{kind}_{scope}_{timestamp}.tar.gz");
        self.config.get_storage_root().join(file_name)
    }

    /// 带重试与硬超时的引擎调用，返回(结果, 实际重试次数)
    async fn invoke_engine_with_retry(
        &self,
        spec: &EngineSpec,
        max_duration: Option<Duration>,
    ) -> (Result<EngineReport>, u32) {
        let max_retries = self.config.retry.max_retries;
        let timeout = max_duration
            .unwrap_or_else(|| Duration::from_secs(self.config.retry.max_execution_secs));
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(timeout, self.engine.run(spec)).await {
                Ok(inner) => inner,
                Err(_) => Err(VaultError::fatal(format!(
                    "引擎调用超时（{}秒），执行转为失败",
                    timeout.as_secs()
                ))),
            };

            match result {
                Ok(report) => return (Ok(report), attempt),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(
                        self.config.retry.backoff_base_ms * (1 << attempt.min(8)),
                    );
                    warn!(
                        "引擎调用临时失败，{}ms后重试 ({}/{}): {}",
                        delay.as_millis(),
                        attempt,
                        max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    fn completed_attrs(
        &self,
        mut attrs: BackupVersionAttrs,
        report: &EngineReport,
        compress: bool,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> BackupVersionAttrs {
        attrs.status = if report.partial {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Completed
        };
        attrs.finished_at = Some(finished_at);
        attrs.duration_secs = Some((finished_at - started_at).num_seconds());
        attrs.raw_size = Some(report.raw_size as i64);
        attrs.compressed_size = report.compressed_size.map(|s| s as i64);
        attrs.compression_ratio = Some(compression_ratio(
            compress,
            report.raw_size,
            report.compressed_size,
        ));
        attrs.storage_location = Some(report.location.clone());
        attrs.checksum_algo = Some(defaults::CHECKSUM_ALGORITHM.to_string());
        attrs.checksum = Some(report.checksum.clone());
        attrs
    }

    /// 同步校验刚产出的备份：复算校验和并做结构检查
    async fn verify_fresh_artifact(&self, destination: &PathBuf, report: &EngineReport) -> bool {
        let checksum_ok = match self.engine.checksum(destination).await {
            Ok(sum) => sum == report.checksum,
            Err(e) => {
                warn!("复算校验和失败: {}", e);
                false
            }
        };
        let structure_ok = match self.engine.validate_structure(destination).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("结构检查失败: {}", e);
                false
            }
        };
        checksum_ok && structure_ok
    }

    /// 解析增量备份的基础备份
    async fn resolve_base(
        &self,
        req: &IncrementalBackupRequest,
    ) -> Result<crate::store::BackupVersion> {
        match &req.base_id {
            Some(base_id) => {
                let entity = self
                    .store
                    .get_backup_entity(base_id)
                    .await?
                    .ok_or_else(|| VaultError::not_found(format!("基础备份 {base_id}")))?;

                // 依赖边只能连接同一租户范围内的备份
                if entity.tenant != req.tenant {
                    return Err(VaultError::validation(format!(
                        "基础备份 {base_id} 不属于请求的租户范围"
                    )));
                }

                let version = self
                    .store
                    .current_backup(base_id)
                    .await?
                    .ok_or_else(|| VaultError::not_found(format!("基础备份 {base_id}")))?;

                if version.attrs.status != ExecutionStatus::Completed {
                    return Err(VaultError::validation(format!(
                        "基础备份 {base_id} 状态为 {}，必须是COMPLETED",
                        version.attrs.status.as_str()
                    )));
                }
                Ok(version)
            }
            None => self
                .store
                .latest_completed_full(req.tenant.clone())
                .await?
                .ok_or_else(|| VaultError::NoBaseBackup {
                    scope: req.tenant.clone().unwrap_or_else(|| "system".to_string()),
                }),
        }
    }

    /// 失败收口：执行尝试必须到达终态，错误和耗时一并落库
    async fn close_out_failed(
        &self,
        execution_id: &str,
        tenant: &Option<String>,
        mut attrs: BackupVersionAttrs,
        started_at: DateTime<Utc>,
        retries_used: u32,
        e: &VaultError,
    ) -> Result<()> {
        let failed_at = Utc::now();
        error!(execution_id = %execution_id, "备份执行失败: {}", e);

        attrs.status = ExecutionStatus::Failed;
        attrs.finished_at = Some(failed_at);
        attrs.duration_secs = Some((failed_at - started_at).num_seconds());
        attrs.error_code = Some(e.code().to_string());
        attrs.error_message = Some(e.to_string());
        attrs.retry_count = retries_used as i32;
        attrs.verification_status = VerificationStatus::Skipped;

        self.store
            .append_backup_version(execution_id, failed_at, attrs)
            .await?;
        self.audit_transition(
            execution_id,
            tenant,
            Some(ExecutionStatus::Running),
            ExecutionStatus::Failed,
        )
        .await;
        Ok(())
    }

    async fn audit_transition(
        &self,
        execution_id: &str,
        tenant: &Option<String>,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    ) {
        emit(
            self.audit.as_ref(),
            AuditEvent {
                entity_kind: "backup_execution",
                entity_id: execution_id.to_string(),
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

/// 压缩率 = (原始大小 - 压缩后大小) / 原始大小 × 100，未压缩时为0
fn compression_ratio(compress: bool, raw: u64, compressed: Option<u64>) -> f64 {
    match (compress, compressed) {
        (true, Some(c)) if raw > 0 => ((raw as f64 - c as f64) / raw as f64) * 100.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::events::TracingAuditSink;

    async fn manager_with(engine: MockEngine) -> BackupExecutionManager {
        let store = StoreManager::new_memory().await.unwrap();
        let mut config = OrchestratorConfig::default();
        config.retry.backoff_base_ms = 1;
        BackupExecutionManager::new(
            store,
            Arc::new(engine),
            Arc::new(TracingAuditSink),
            config,
        )
    }

    #[tokio::test]
    async fn test_full_backup_completed_and_verified() {
        let mgr = manager_with(MockEngine::default()).await;

        let outcome = mgr
            .create_full_backup(FullBackupRequest::new(Some("t1".into())))
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.verification_status, VerificationStatus::Verified);
        assert_eq!(outcome.raw_size, Some(1024));
        assert_eq!(outcome.compressed_size, Some(512));

        // 终态版本带保留期与校验和
        let current = mgr
            .store
            .current_backup(&outcome.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert!(current.attrs.expires_at.is_some());
        assert_eq!(current.attrs.checksum.as_deref(), Some("deadbeef"));
        assert!((current.attrs.compression_ratio.unwrap() - 50.0).abs() < 1e-9);

        // 历史：RUNNING -> COMPLETED，两个版本
        let history = mgr
            .store
            .backup_history(&outcome.execution_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attrs.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_engine_failure_reaches_terminal_failed() {
        let mgr = manager_with(MockEngine::failing_fatal()).await;

        let err = mgr
            .create_full_backup(FullBackupRequest::new(Some("t1".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Fatal(_)));

        // 即便失败，执行也必须到达终态FAILED，错误与耗时落库
        let backups = mgr.store.list_backups(Some("t1".into())).await.unwrap();
        assert_eq!(backups.len(), 1);
        let failed = &backups[0];
        assert_eq!(failed.attrs.status, ExecutionStatus::Failed);
        assert_eq!(failed.attrs.error_code.as_deref(), Some("FATAL"));
        assert!(failed.attrs.error_message.is_some());
        assert!(failed.attrs.duration_secs.is_some());
        assert!(failed.valid_to.is_none());
    }

    #[tokio::test]
    async fn test_transient_errors_retried_then_succeed() {
        let mgr = manager_with(MockEngine::failing_transient(2)).await;

        let outcome = mgr
            .create_full_backup(FullBackupRequest::new(None))
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);

        let current = mgr
            .store
            .current_backup(&outcome.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.attrs.retry_count, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_terminal_failed() {
        let mgr = manager_with(MockEngine::failing_transient(10)).await;

        let err = mgr
            .create_full_backup(FullBackupRequest::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Transient(_)));

        let backups = mgr.store.list_backups(None).await.unwrap();
        assert_eq!(backups[0].attrs.status, ExecutionStatus::Failed);
        // 记录的重试次数等于配置上限
        assert_eq!(backups[0].attrs.retry_count, 3);
    }

    #[tokio::test]
    async fn test_incremental_without_base_fails() {
        let mgr = manager_with(MockEngine::default()).await;

        let err = mgr
            .create_incremental_backup(IncrementalBackupRequest::new(Some("t1".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NoBaseBackup { .. }));

        // 校验失败发生在任何版本创建之前，不留半截记录
        let backups = mgr.store.list_backups(Some("t1".into())).await.unwrap();
        assert!(backups.is_empty());
    }

    #[tokio::test]
    async fn test_incremental_resolves_latest_full_and_links_dependency() {
        let mgr = manager_with(MockEngine::default()).await;

        let full = mgr
            .create_full_backup(FullBackupRequest::new(Some("t1".into())))
            .await
            .unwrap();

        let inc = mgr
            .create_incremental_backup(IncrementalBackupRequest::new(Some("t1".into())))
            .await
            .unwrap();

        assert_eq!(inc.base_id, full.execution_id);
        assert_eq!(inc.status, ExecutionStatus::Completed);
        assert!(inc.changes_captured.is_some());

        // 依赖边已建立：基础备份有一个未过期的增量依赖
        let dependents = mgr
            .store
            .live_dependent_count(&full.execution_id)
            .await
            .unwrap();
        assert_eq!(dependents, 1);
    }

    #[tokio::test]
    async fn test_incremental_explicit_base_wrong_tenant_rejected() {
        let mgr = manager_with(MockEngine::default()).await;

        let full = mgr
            .create_full_backup(FullBackupRequest::new(Some("t1".into())))
            .await
            .unwrap();

        let mut req = IncrementalBackupRequest::new(Some("t2".into()));
        req.base_id = Some(full.execution_id);
        let err = mgr.create_incremental_backup(req).await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_scheduled_slot_is_idempotent() {
        let mgr = manager_with(MockEngine::default()).await;
        let slot = Utc::now();

        let mut req = FullBackupRequest::new(Some("t1".into()));
        req.scheduled_for = Some(slot);

        let first = mgr.create_full_backup(req.clone()).await.unwrap();
        let second = mgr.create_full_backup(req).await.unwrap();

        // 相同时槽的重复派发收敛到同一执行
        assert_eq!(first.execution_id, second.execution_id);
        let history = mgr.store.backup_history(&first.execution_id).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_engine_timeout_is_terminal_failed() {
        let engine = MockEngine {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let mgr = manager_with(engine).await;

        let mut req = FullBackupRequest::new(None);
        req.max_duration = Some(Duration::from_millis(10));

        let err = mgr.create_full_backup(req).await.unwrap_err();
        assert!(matches!(err, VaultError::Fatal(_)));

        let backups = mgr.store.list_backups(None).await.unwrap();
        assert_eq!(backups[0].attrs.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_compression_ratio() {
        assert!((compression_ratio(true, 1000, Some(250)) - 75.0).abs() < 1e-9);
        assert_eq!(compression_ratio(false, 1000, None), 0.0);
        assert_eq!(compression_ratio(true, 0, Some(0)), 0.0);
    }
}
