use crate::{
    VaultError,
    backup::{BackupExecutionManager, FullBackupRequest, IncrementalBackupRequest},
    config::SchedulerConfig,
    error::Result,
    events::{Notification, Notifier},
    scheduler::ScheduleManager,
    store::{BackupType, DueSchedule},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 租约键：同一(租户, 备份类型)同时只允许一个在途执行
type LeaseKey = (Option<String>, BackupType);

/// 并发租约表
#[derive(Clone, Default)]
pub struct LeaseTable {
    inner: Arc<DashMap<LeaseKey, ()>>,
}

/// 租约持有凭证，drop时自动释放
pub struct LeaseGuard {
    table: Arc<DashMap<LeaseKey, ()>>,
    key: LeaseKey,
}

impl std::fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard").field("key", &self.key).finish()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.table.remove(&self.key);
    }
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取租约，已被占用时返回临时性错误（下一轮可以再试）
    pub fn acquire(
        &self,
        tenant: Option<String>,
        backup_type: BackupType,
    ) -> Result<LeaseGuard> {
        use dashmap::mapref::entry::Entry;

        let key = (tenant, backup_type);
        match self.inner.entry(key.clone()) {
            Entry::Occupied(_) => Err(VaultError::transient(format!(
                "租约已被占用: ({:?}, {})",
                key.0,
                key.1.as_str()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(LeaseGuard {
                    table: self.inner.clone(),
                    key,
                })
            }
        }
    }

    pub fn held(&self, tenant: &Option<String>, backup_type: BackupType) -> bool {
        self.inner.contains_key(&(tenant.clone(), backup_type))
    }
}

/// 调度驱动器
///
/// 周期性轮询到期调度，在有界工作池中派发备份执行。
/// 派发前先推进next_run_at，引擎跑多久都不会造成重复派发。
pub struct SchedulerDriver {
    schedules: ScheduleManager,
    backups: BackupExecutionManager,
    notifier: Arc<dyn Notifier>,
    leases: LeaseTable,
    pool: Arc<Semaphore>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
}

impl SchedulerDriver {
    pub fn new(
        schedules: ScheduleManager,
        backups: BackupExecutionManager,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.worker_pool_size));
        Self {
            schedules,
            backups,
            notifier,
            leases: LeaseTable::new(),
            pool,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// 用于请求停机的令牌
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 轮询主循环，收到停机信号后退出
    pub async fn run(&self) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            pool_size = self.config.worker_pool_size,
            "调度驱动器启动"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("调度驱动器收到停机信号，退出轮询");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(Utc::now()).await {
                        warn!("调度轮询失败: {}", e);
                    }
                }
            }
        }
    }

    /// 单轮轮询：派发所有已到期的调度，返回派发数
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<usize> {
        // 从纪元起查到当前时刻，驱动器宕机期间积压的调度也能补上
        let due = self
            .schedules
            .due_schedules(
                DateTime::UNIX_EPOCH,
                now - DateTime::UNIX_EPOCH,
                self.config.due_limit,
            )
            .await?;

        let mut dispatched = 0usize;
        for schedule in due {
            if self.dispatch(schedule, now).await? {
                dispatched += 1;
            }
        }

        if dispatched > 0 {
            info!(dispatched, "本轮调度派发完成");
        }
        Ok(dispatched)
    }

    /// 派发单条到期调度；拿不到租约时跳过（上一次执行仍在途）
    async fn dispatch(&self, schedule: DueSchedule, now: DateTime<Utc>) -> Result<bool> {
        let lease = match self
            .leases
            .acquire(schedule.tenant.clone(), schedule.backup_type)
        {
            Ok(lease) => lease,
            Err(_) => {
                debug!(
                    schedule = %schedule.name,
                    "上一次执行仍在途，本轮跳过"
                );
                return Ok(false);
            }
        };

        let permit = self
            .pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| VaultError::fatal("工作池已关闭"))?;

        // 先推进next_run_at，执行耗时不影响下一次触发时间
        let slot = schedule.next_run_at;
        self.schedules
            .mark_dispatched(&schedule.schedule_id, now)
            .await?;

        let backups = self.backups.clone();
        let schedules = self.schedules.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let _lease = lease;
            let _permit = permit;

            let max_duration = schedule
                .max_duration_secs
                .map(|s| Duration::from_secs(s.max(0) as u64));

            let result = match schedule.backup_type {
                BackupType::Full => {
                    let mut req = FullBackupRequest::new(schedule.tenant.clone());
                    req.initiator = Some(format!("schedule:{}", schedule.name));
                    req.retention_days = schedule.retention_days;
                    req.max_duration = max_duration;
                    req.scheduled_for = Some(slot);
                    backups
                        .create_full_backup(req)
                        .await
                        .map(|o| (o.execution_id, o.status))
                }
                _ => {
                    let mut req = IncrementalBackupRequest::new(schedule.tenant.clone());
                    req.backup_type = schedule.backup_type;
                    req.initiator = Some(format!("schedule:{}", schedule.name));
                    req.retention_days = schedule.retention_days;
                    req.max_duration = max_duration;
                    req.scheduled_for = Some(slot);
                    backups
                        .create_incremental_backup(req)
                        .await
                        .map(|o| (o.execution_id, o.status))
                }
            };

            let (execution_id, success, message) = match result {
                Ok((execution_id, status)) => {
                    let message = format!("执行完成，状态 {}", status.as_str());
                    (execution_id, true, message)
                }
                Err(e) => {
                    warn!(schedule = %schedule.name, "调度派发的备份失败: {}", e);
                    (String::new(), false, e.to_string())
                }
            };

            // 关联真实执行（失败时没有执行记录可关联）
            if success {
                if let Err(e) = schedules
                    .link_execution(&schedule.schedule_id, &execution_id)
                    .await
                {
                    warn!(schedule = %schedule.name, "关联调度与执行失败: {}", e);
                }
            }

            let should_notify = if success {
                schedule.notify_on_success
            } else {
                schedule.notify_on_failure
            };
            if should_notify {
                if let Err(e) = notifier
                    .notify(Notification {
                        schedule_name: schedule.name.clone(),
                        tenant: schedule.tenant.clone(),
                        execution_id,
                        success,
                        message,
                    })
                    .await
                {
                    warn!(schedule = %schedule.name, "发送通知失败: {}", e);
                }
            }
        });

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_exclusive_per_key() {
        let table = LeaseTable::new();

        let guard = table
            .acquire(Some("t1".into()), BackupType::Full)
            .unwrap();
        // 同键二次获取被拒
        let err = table
            .acquire(Some("t1".into()), BackupType::Full)
            .unwrap_err();
        assert!(matches!(err, VaultError::Transient(_)));

        // 不同类型或不同租户互不影响
        let _other_type = table
            .acquire(Some("t1".into()), BackupType::Incremental)
            .unwrap();
        let _other_tenant = table.acquire(Some("t2".into()), BackupType::Full).unwrap();

        drop(guard);
        // 释放后可再次获取
        let _again = table.acquire(Some("t1".into()), BackupType::Full).unwrap();
    }

    #[test]
    fn test_lease_released_on_drop() {
        let table = LeaseTable::new();
        {
            let _guard = table.acquire(None, BackupType::Full).unwrap();
            assert!(table.held(&None, BackupType::Full));
        }
        assert!(!table.held(&None, BackupType::Full));
    }

    mod driver {
        use super::*;
        use crate::config::OrchestratorConfig;
        use chrono::Duration as ChronoDuration;
        use crate::engine::mock::MockEngine;
        use crate::events::{AuditSink, TracingAuditSink, TracingNotifier};
        use crate::scheduler::CreateScheduleRequest;
        use crate::store::{ExecutionStatus, StoreManager};

        async fn driver_fixture() -> (StoreManager, ScheduleManager, SchedulerDriver) {
            let store = StoreManager::new_memory().await.unwrap();
            let schedules = ScheduleManager::new(store.clone());
            let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
            let config = OrchestratorConfig::default();
            let backups = BackupExecutionManager::new(
                store.clone(),
                Arc::new(MockEngine::default()),
                audit,
                config.clone(),
            );
            let driver = SchedulerDriver::new(
                schedules.clone(),
                backups,
                Arc::new(TracingNotifier),
                config.scheduler,
            );
            (store, schedules, driver)
        }

        /// 轮询直到备份出现或超时
        async fn wait_for_backups(store: &StoreManager, count: usize) -> Vec<crate::store::BackupVersion> {
            for _ in 0..50 {
                let backups = store.list_backups(None).await.unwrap();
                if backups.len() >= count {
                    return backups;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            store.list_backups(None).await.unwrap()
        }

        #[tokio::test]
        async fn test_poll_dispatches_due_schedule() {
            let (store, schedules, driver) = driver_fixture().await;

            let id = schedules
                .create_schedule(CreateScheduleRequest::new(
                    "nightly",
                    BackupType::Full,
                    "every:1s",
                ))
                .await
                .unwrap();

            // 把时间拨到调度到期之后
            let later = Utc::now() + ChronoDuration::seconds(5);
            let dispatched = driver.poll_once(later).await.unwrap();
            assert_eq!(dispatched, 1);

            let backups = wait_for_backups(&store, 1).await;
            assert_eq!(backups.len(), 1);
            assert_eq!(backups[0].attrs.status, ExecutionStatus::Completed);
            assert_eq!(
                backups[0].attrs.initiator.as_deref(),
                Some("schedule:nightly")
            );

            // 派发已推进next_run_at，同一时刻再轮询不会重复派发
            let again = driver.poll_once(later).await.unwrap();
            assert_eq!(again, 0);

            let current = store.current_schedule(&id).await.unwrap().unwrap();
            assert_eq!(current.attrs.run_count, 1);
        }

        #[tokio::test]
        async fn test_run_stops_on_shutdown() {
            let (_store, _schedules, driver) = driver_fixture().await;
            let driver = Arc::new(driver);
            let token = driver.shutdown_token();

            let handle = tokio::spawn({
                let driver = driver.clone();
                async move { driver.run().await }
            });

            token.cancel();
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("驱动器应在停机信号后退出")
                .unwrap();
        }
    }
}
