use crate::{
    error::Result,
    events::{AuditEvent, AuditSink, emit},
    store::StoreManager,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// 过期版本上的清理标记
const SWEEP_MARKER: &str = "retention-sweeper";

/// 单条候选项的扫描结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// 演练模式：本应过期但未做任何变更
    WouldExpire,
    /// 已转为EXPIRED
    Expired,
    /// 仍有存活的增量依赖，跳过不动
    RetainedHasDependents,
}

impl SweepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WouldExpire => "WOULD_EXPIRE",
            Self::Expired => "EXPIRED",
            Self::RetainedHasDependents => "RETAINED_HAS_DEPENDENTS",
        }
    }
}

/// 一条候选项的处理记录
#[derive(Debug, Clone)]
pub struct CleanupAction {
    pub execution_id: String,
    pub tenant: Option<String>,
    pub action: SweepAction,
    pub file_name: Option<String>,
    pub reclaimed_bytes: i64,
}

/// 一轮扫描的汇总
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub dry_run: bool,
    pub actions: Vec<CleanupAction>,
    pub expired_count: usize,
    pub retained_count: usize,
    pub reclaimed_bytes: i64,
}

/// 保留策略扫描器
///
/// 找出保留期已过的已完成备份，把它们转为EXPIRED。
/// 仍被存活增量依赖的基础备份不会被过期，先清理依赖方。
#[derive(Clone)]
pub struct RetentionSweeper {
    store: StoreManager,
    audit: Arc<dyn AuditSink>,
}

impl RetentionSweeper {
    pub fn new(store: StoreManager, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// 扫描过期备份
    ///
    /// dry_run为true时只报告、不写任何状态。
    /// initiator记录到过期版本上，None时落定时清理标记。
    pub async fn sweep_expired(
        &self,
        tenant: Option<String>,
        dry_run: bool,
        initiator: Option<String>,
    ) -> Result<SweepReport> {
        let now = Utc::now();
        let marker = initiator.as_deref().unwrap_or(SWEEP_MARKER);
        let candidates = self.store.expired_candidates(tenant, now).await?;

        info!(
            candidates = candidates.len(),
            dry_run, "开始保留策略扫描"
        );

        let mut actions = Vec::with_capacity(candidates.len());
        let mut expired_count = 0usize;
        let mut retained_count = 0usize;
        let mut reclaimed_bytes = 0i64;

        for candidate in candidates {
            let dependents = self
                .store
                .live_dependent_count(&candidate.execution_id)
                .await?;

            let action = if dependents > 0 {
                warn!(
                    execution_id = %candidate.execution_id,
                    dependents,
                    "备份已过保留期但仍有存活依赖，跳过"
                );
                retained_count += 1;
                SweepAction::RetainedHasDependents
            } else if dry_run {
                SweepAction::WouldExpire
            } else {
                self.store
                    .expire_backup(&candidate.execution_id, marker, now)
                    .await?;
                emit(
                    self.audit.as_ref(),
                    AuditEvent {
                        entity_kind: "backup_execution",
                        entity_id: candidate.execution_id.clone(),
                        tenant: candidate.tenant.clone(),
                        from_status: Some("COMPLETED".to_string()),
                        to_status: "EXPIRED".to_string(),
                        at: now,
                        detail: candidate.file_name.clone(),
                    },
                )
                .await;
                expired_count += 1;
                SweepAction::Expired
            };

            let size = candidate.raw_size.unwrap_or(0);
            if action != SweepAction::RetainedHasDependents {
                reclaimed_bytes += size;
            }

            actions.push(CleanupAction {
                execution_id: candidate.execution_id,
                tenant: candidate.tenant,
                action,
                file_name: candidate.file_name,
                reclaimed_bytes: size,
            });
        }

        info!(
            expired = expired_count,
            retained = retained_count,
            reclaimed_bytes,
            dry_run,
            "保留策略扫描完成"
        );

        Ok(SweepReport {
            dry_run,
            actions,
            expired_count,
            retained_count,
            reclaimed_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        BackupScope, BackupType, BackupVersionAttrs, ExecutionStatus, StoreManager,
    };
    use crate::events::TracingAuditSink;
    use chrono::{Duration as ChronoDuration, Utc};

    /// 直接在存储上捏一个指定过期时间的已完成备份
    async fn seed_completed(
        store: &StoreManager,
        id: &str,
        tenant: Option<String>,
        expires_in_days: i64,
        raw_size: i64,
    ) {
        let now = Utc::now();
        store
            .create_backup_entity(id, tenant, now)
            .await
            .unwrap();
        let mut attrs = BackupVersionAttrs::running(
            BackupType::Full,
            BackupScope::Tenant,
            now,
            None,
            3,
        );
        attrs.status = ExecutionStatus::Completed;
        attrs.raw_size = Some(raw_size);
        attrs.file_name = Some(format!("{id}.tar.gz"));
        attrs.expires_at = Some(now + ChronoDuration::days(expires_in_days));
        store.append_backup_version(id, now, attrs).await.unwrap();
    }

    async fn sweeper() -> (StoreManager, RetentionSweeper) {
        let store = StoreManager::new_memory().await.unwrap();
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(TracingAuditSink));
        (store, sweeper)
    }

    #[tokio::test]
    async fn test_dry_run_is_pure() {
        let (store, sweeper) = sweeper().await;
        seed_completed(&store, "bx-old", Some("t1".into()), -1, 1000).await;
        seed_completed(&store, "bx-fresh", Some("t1".into()), 30, 500).await;

        let report = sweeper.sweep_expired(None, true, None).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].action, SweepAction::WouldExpire);
        assert_eq!(report.reclaimed_bytes, 1000);

        // 演练模式不产生任何状态变更
        let current = store.current_backup("bx-old").await.unwrap().unwrap();
        assert_eq!(current.attrs.status, ExecutionStatus::Completed);
        let history = store.backup_history("bx-old").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_real_sweep_expires() {
        let (store, sweeper) = sweeper().await;
        seed_completed(&store, "bx-old", Some("t1".into()), -1, 1000).await;

        let report = sweeper.sweep_expired(None, false, None).await.unwrap();
        assert_eq!(report.expired_count, 1);
        assert_eq!(report.actions[0].action, SweepAction::Expired);

        let current = store.current_backup("bx-old").await.unwrap().unwrap();
        assert_eq!(current.attrs.status, ExecutionStatus::Expired);
        assert_eq!(current.attrs.initiator.as_deref(), Some(SWEEP_MARKER));

        // COMPLETED版本被关闭，历史保留
        let history = store.backup_history("bx-old").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].valid_to.is_some());
    }

    #[tokio::test]
    async fn test_operator_initiator_recorded_on_expiry() {
        let (store, sweeper) = sweeper().await;
        seed_completed(&store, "bx-old", Some("t1".into()), -1, 1000).await;

        // 操作员触发的清理把操作员身份落到过期版本上
        let report = sweeper
            .sweep_expired(None, false, Some("cli".to_string()))
            .await
            .unwrap();
        assert_eq!(report.expired_count, 1);

        let current = store.current_backup("bx-old").await.unwrap().unwrap();
        assert_eq!(current.attrs.status, ExecutionStatus::Expired);
        assert_eq!(current.attrs.initiator.as_deref(), Some("cli"));
    }

    #[tokio::test]
    async fn test_base_with_live_dependents_retained() {
        let (store, sweeper) = sweeper().await;
        let now = Utc::now();
        seed_completed(&store, "bx-base", Some("t1".into()), -1, 1000).await;
        seed_completed(&store, "bx-inc", Some("t1".into()), 30, 100).await;
        store
            .add_dependency("bx-base", "bx-inc", Some("t1".into()), now)
            .await
            .unwrap();

        let report = sweeper.sweep_expired(None, false, None).await.unwrap();
        assert_eq!(report.retained_count, 1);
        assert_eq!(report.expired_count, 0);
        assert_eq!(
            report.actions[0].action,
            SweepAction::RetainedHasDependents
        );
        assert_eq!(report.reclaimed_bytes, 0);

        let current = store.current_backup("bx-base").await.unwrap().unwrap();
        assert_eq!(current.attrs.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_base_released_after_dependent_expires() {
        let (store, sweeper) = sweeper().await;
        let now = Utc::now();
        seed_completed(&store, "bx-base", Some("t1".into()), -2, 1000).await;
        seed_completed(&store, "bx-inc", Some("t1".into()), -1, 100).await;
        store
            .add_dependency("bx-base", "bx-inc", Some("t1".into()), now)
            .await
            .unwrap();

        // 第一轮：依赖方先过期，基础备份被保护
        let first = sweeper.sweep_expired(None, false, None).await.unwrap();
        assert_eq!(first.expired_count, 1);
        assert_eq!(first.retained_count, 1);

        // 第二轮：依赖已不存活，基础备份可以过期
        let second = sweeper.sweep_expired(None, false, None).await.unwrap();
        assert_eq!(second.expired_count, 1);
        let current = store.current_backup("bx-base").await.unwrap().unwrap();
        assert_eq!(current.attrs.status, ExecutionStatus::Expired);
    }

    #[tokio::test]
    async fn test_tenant_scoped_sweep() {
        let (store, sweeper) = sweeper().await;
        seed_completed(&store, "bx-t1", Some("t1".into()), -1, 100).await;
        seed_completed(&store, "bx-t2", Some("t2".into()), -1, 200).await;

        let report = sweeper
            .sweep_expired(Some("t1".into()), false, None)
            .await
            .unwrap();
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].execution_id, "bx-t1");

        // t2的备份未被触碰
        let other = store.current_backup("bx-t2").await.unwrap().unwrap();
        assert_eq!(other.attrs.status, ExecutionStatus::Completed);
    }
}
