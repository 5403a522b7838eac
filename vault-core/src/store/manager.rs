use crate::constants::store::CHANNEL_CAPACITY;
use crate::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::StoreActor;
use super::messages::StoreMessage;
use super::models::{
    BackupVersion, BackupVersionAttrs, DueSchedule, EntityRecord, ExpiredCandidate,
    RecoveryVersion, RecoveryVersionAttrs, ScheduleVersion, ScheduleVersionAttrs,
    VerificationStatus,
};

/// 版本化实体存储管理器
///
/// 可克隆的Actor句柄。所有组件（执行管理器、恢复管理器、调度器、
/// 保留清扫器、校验器）都通过它访问存储，从不直接改字段。
#[derive(Debug, Clone)]
pub struct StoreManager {
    sender: mpsc::Sender<StoreMessage>,
}

impl StoreManager {
    /// 创建新的存储管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        let actor = StoreActor::new(db_path)?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 创建内存存储管理器（主要用于测试）
    pub async fn new_memory() -> Result<Self> {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        let actor = StoreActor::new_memory()?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 发送消息并等待Actor响应
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(make(respond_to))
            .await
            .map_err(|_| VaultError::custom("存储Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| VaultError::custom("等待存储Actor响应失败"))?
    }

    async fn init_tables(&self) -> Result<()> {
        self.request(|respond_to| StoreMessage::InitTables { respond_to })
            .await
    }

    // ========== 备份执行 ==========

    /// 创建备份执行身份，返回是否新建（false表示派生ID已存在）
    pub async fn create_backup_entity(
        &self,
        id: &str,
        tenant: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.to_string();
        self.request(move |respond_to| StoreMessage::CreateBackupEntity {
            id,
            tenant,
            created_at,
            respond_to,
        })
        .await
    }

    /// 读取备份执行的身份记录
    pub async fn get_backup_entity(&self, id: &str) -> Result<Option<EntityRecord>> {
        let id = id.to_string();
        self.request(move |respond_to| StoreMessage::GetBackupEntity { id, respond_to })
            .await
    }

    /// 关闭当前开放版本并追加新版本，返回新版本号
    pub async fn append_backup_version(
        &self,
        execution_id: &str,
        at: DateTime<Utc>,
        attrs: BackupVersionAttrs,
    ) -> Result<i64> {
        let execution_id = execution_id.to_string();
        self.request(move |respond_to| StoreMessage::AppendBackupVersion {
            execution_id,
            at,
            attrs: Box::new(attrs),
            respond_to,
        })
        .await
    }

    pub async fn current_backup(&self, execution_id: &str) -> Result<Option<BackupVersion>> {
        let execution_id = execution_id.to_string();
        self.request(move |respond_to| StoreMessage::CurrentBackup {
            execution_id,
            respond_to,
        })
        .await
    }

    pub async fn backup_history(&self, execution_id: &str) -> Result<Vec<BackupVersion>> {
        let execution_id = execution_id.to_string();
        self.request(move |respond_to| StoreMessage::BackupHistory {
            execution_id,
            respond_to,
        })
        .await
    }

    pub async fn list_backups(&self, tenant: Option<String>) -> Result<Vec<BackupVersion>> {
        self.request(move |respond_to| StoreMessage::ListBackups { tenant, respond_to })
            .await
    }

    /// 最近一次已完成的全量备份
    pub async fn latest_completed_full(
        &self,
        tenant: Option<String>,
    ) -> Result<Option<BackupVersion>> {
        self.request(move |respond_to| StoreMessage::LatestCompletedFull { tenant, respond_to })
            .await
    }

    /// 恢复下限：开始时间不晚于目标时间点的最新已完成备份
    pub async fn recovery_floor(
        &self,
        tenant: Option<String>,
        target: DateTime<Utc>,
    ) -> Result<Option<BackupVersion>> {
        self.request(move |respond_to| StoreMessage::RecoveryFloor {
            tenant,
            target,
            respond_to,
        })
        .await
    }

    pub async fn expired_candidates(
        &self,
        tenant: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredCandidate>> {
        self.request(move |respond_to| StoreMessage::ExpiredCandidates {
            tenant,
            now,
            respond_to,
        })
        .await
    }

    pub async fn live_dependent_count(&self, base_id: &str) -> Result<i64> {
        let base_id = base_id.to_string();
        self.request(move |respond_to| StoreMessage::LiveDependentCount {
            base_id,
            respond_to,
        })
        .await
    }

    /// 过期转换（原子）：关闭开放版本并追加EXPIRED终态版本
    pub async fn expire_backup(
        &self,
        execution_id: &str,
        marker: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let execution_id = execution_id.to_string();
        let marker = marker.to_string();
        self.request(move |respond_to| StoreMessage::ExpireBackup {
            execution_id,
            marker,
            at,
            respond_to,
        })
        .await
    }

    /// 记录校验结果（原子）：只更新校验字段，不触碰基准校验和
    pub async fn record_verification(
        &self,
        execution_id: &str,
        verification_status: VerificationStatus,
        integrity_verified: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let execution_id = execution_id.to_string();
        self.request(move |respond_to| StoreMessage::RecordVerification {
            execution_id,
            verification_status,
            integrity_verified,
            at,
            respond_to,
        })
        .await
    }

    // ========== 依赖图与溯源 ==========

    pub async fn add_dependency(
        &self,
        base_id: &str,
        dependent_id: &str,
        tenant: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let base_id = base_id.to_string();
        let dependent_id = dependent_id.to_string();
        self.request(move |respond_to| StoreMessage::AddDependency {
            base_id,
            dependent_id,
            tenant,
            at,
            respond_to,
        })
        .await
    }

    pub async fn add_recovery_link(
        &self,
        recovery_id: &str,
        backup_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let recovery_id = recovery_id.to_string();
        let backup_id = backup_id.to_string();
        self.request(move |respond_to| StoreMessage::AddRecoveryLink {
            recovery_id,
            backup_id,
            at,
            respond_to,
        })
        .await
    }

    pub async fn add_schedule_link(
        &self,
        schedule_id: &str,
        execution_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let schedule_id = schedule_id.to_string();
        let execution_id = execution_id.to_string();
        self.request(move |respond_to| StoreMessage::AddScheduleLink {
            schedule_id,
            execution_id,
            at,
            respond_to,
        })
        .await
    }

    // ========== 恢复操作 ==========

    pub async fn create_recovery_entity(
        &self,
        id: &str,
        tenant: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.to_string();
        self.request(move |respond_to| StoreMessage::CreateRecoveryEntity {
            id,
            tenant,
            created_at,
            respond_to,
        })
        .await
    }

    pub async fn append_recovery_version(
        &self,
        recovery_id: &str,
        at: DateTime<Utc>,
        attrs: RecoveryVersionAttrs,
    ) -> Result<i64> {
        let recovery_id = recovery_id.to_string();
        self.request(move |respond_to| StoreMessage::AppendRecoveryVersion {
            recovery_id,
            at,
            attrs: Box::new(attrs),
            respond_to,
        })
        .await
    }

    pub async fn current_recovery(&self, recovery_id: &str) -> Result<Option<RecoveryVersion>> {
        let recovery_id = recovery_id.to_string();
        self.request(move |respond_to| StoreMessage::CurrentRecovery {
            recovery_id,
            respond_to,
        })
        .await
    }

    pub async fn recovery_history(&self, recovery_id: &str) -> Result<Vec<RecoveryVersion>> {
        let recovery_id = recovery_id.to_string();
        self.request(move |respond_to| StoreMessage::RecoveryHistory {
            recovery_id,
            respond_to,
        })
        .await
    }

    // ========== 备份调度 ==========

    pub async fn create_schedule_entity(
        &self,
        id: &str,
        tenant: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.to_string();
        self.request(move |respond_to| StoreMessage::CreateScheduleEntity {
            id,
            tenant,
            created_at,
            respond_to,
        })
        .await
    }

    pub async fn append_schedule_version(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
        attrs: ScheduleVersionAttrs,
    ) -> Result<i64> {
        let schedule_id = schedule_id.to_string();
        self.request(move |respond_to| StoreMessage::AppendScheduleVersion {
            schedule_id,
            at,
            attrs: Box::new(attrs),
            respond_to,
        })
        .await
    }

    pub async fn current_schedule(&self, schedule_id: &str) -> Result<Option<ScheduleVersion>> {
        let schedule_id = schedule_id.to_string();
        self.request(move |respond_to| StoreMessage::CurrentSchedule {
            schedule_id,
            respond_to,
        })
        .await
    }

    pub async fn schedule_by_name(&self, name: &str) -> Result<Option<ScheduleVersion>> {
        let name = name.to_string();
        self.request(move |respond_to| StoreMessage::ScheduleByName { name, respond_to })
            .await
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleVersion>> {
        self.request(|respond_to| StoreMessage::ListSchedules { respond_to })
            .await
    }

    /// 前瞻窗口内到期的活跃调度，按到期时间升序，最多limit条
    pub async fn due_schedules(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DueSchedule>> {
        self.request(move |respond_to| StoreMessage::DueSchedules {
            from,
            until,
            limit,
            respond_to,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{BackupScope, BackupType, ExecutionStatus};

    #[tokio::test]
    async fn test_single_open_version_invariant() {
        let store = StoreManager::new_memory().await.unwrap();
        let now = Utc::now();

        store
            .create_backup_entity("bx-test-1", Some("t1".into()), now)
            .await
            .unwrap();

        // 连续追加多个版本后，开放版本有且只有一条
        let mut attrs = BackupVersionAttrs::running(
            BackupType::Full,
            BackupScope::Tenant,
            now,
            Some("tester".into()),
            3,
        );
        store
            .append_backup_version("bx-test-1", now, attrs.clone())
            .await
            .unwrap();

        attrs.status = ExecutionStatus::Completed;
        store
            .append_backup_version("bx-test-1", now + chrono::Duration::seconds(1), attrs.clone())
            .await
            .unwrap();

        attrs.recovery_tested = true;
        store
            .append_backup_version("bx-test-1", now + chrono::Duration::seconds(2), attrs)
            .await
            .unwrap();

        let history = store.backup_history("bx-test-1").await.unwrap();
        assert_eq!(history.len(), 3);
        let open: Vec<_> = history.iter().filter(|v| v.valid_to.is_none()).collect();
        assert_eq!(open.len(), 1);
        assert!(open[0].attrs.recovery_tested);

        // current() 返回的就是那条开放版本
        let current = store.current_backup("bx-test-1").await.unwrap().unwrap();
        assert_eq!(current.version_id, open[0].version_id);
    }

    #[tokio::test]
    async fn test_create_entity_idempotent() {
        let store = StoreManager::new_memory().await.unwrap();
        let now = Utc::now();

        let first = store
            .create_backup_entity("bx-dup", None, now)
            .await
            .unwrap();
        let second = store
            .create_backup_entity("bx-dup", None, now)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_self_dependency_rejected() {
        let store = StoreManager::new_memory().await.unwrap();
        let now = Utc::now();

        let err = store
            .add_dependency("bx-a", "bx-a", None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::VaultError::SelfDependency(_)));
    }

    #[tokio::test]
    async fn test_history_ordered_by_valid_from() {
        let store = StoreManager::new_memory().await.unwrap();
        let t0 = Utc::now();

        store.create_backup_entity("bx-ord", None, t0).await.unwrap();

        let attrs =
            BackupVersionAttrs::running(BackupType::Full, BackupScope::System, t0, None, 3);
        for i in 0..4 {
            store
                .append_backup_version("bx-ord", t0 + chrono::Duration::seconds(i), attrs.clone())
                .await
                .unwrap();
        }

        let history = store.backup_history("bx-ord").await.unwrap();
        let times: Vec<_> = history.iter().map(|v| v.valid_from).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }
}
