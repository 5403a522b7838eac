use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::models::{
    BackupVersion, BackupVersionAttrs, DueSchedule, EntityRecord, ExpiredCandidate,
    RecoveryVersion, RecoveryVersionAttrs, ScheduleVersion, ScheduleVersionAttrs,
    VerificationStatus,
};

/// 存储Actor操作消息
///
/// 所有写操作都在Actor消息循环中串行执行，这也是
/// "同一身份同时只有一条开放版本"不变式的并发保证。
#[derive(Debug)]
pub enum StoreMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份执行 ==========
    /// 创建备份执行身份（幂等：已存在则忽略）
    CreateBackupEntity {
        id: String,
        tenant: Option<String>,
        created_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    /// 读取备份执行的身份记录（租户校验用）
    GetBackupEntity {
        id: String,
        respond_to: oneshot::Sender<Result<Option<EntityRecord>>>,
    },
    /// 关闭当前开放版本并追加新版本
    AppendBackupVersion {
        execution_id: String,
        at: DateTime<Utc>,
        attrs: Box<BackupVersionAttrs>,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    /// 读取当前开放版本
    CurrentBackup {
        execution_id: String,
        respond_to: oneshot::Sender<Result<Option<BackupVersion>>>,
    },
    /// 按生效时间排序的完整版本历史
    BackupHistory {
        execution_id: String,
        respond_to: oneshot::Sender<Result<Vec<BackupVersion>>>,
    },
    /// 某租户范围内所有备份的开放版本
    ListBackups {
        tenant: Option<String>,
        respond_to: oneshot::Sender<Result<Vec<BackupVersion>>>,
    },
    /// 最近一次已完成的全量备份（按开始时间倒序）
    LatestCompletedFull {
        tenant: Option<String>,
        respond_to: oneshot::Sender<Result<Option<BackupVersion>>>,
    },
    /// 恢复下限：开始时间不晚于目标时间点的最新已完成备份
    RecoveryFloor {
        tenant: Option<String>,
        target: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<Option<BackupVersion>>>,
    },
    /// 已完成且过期的备份候选（tenant为None时扫描全部）
    ExpiredCandidates {
        tenant: Option<String>,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<Vec<ExpiredCandidate>>>,
    },
    /// 以该备份为基础、且尚未过期的增量备份数量
    LiveDependentCount {
        base_id: String,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    /// 过期转换：原子地关闭开放版本并追加EXPIRED终态版本
    ExpireBackup {
        execution_id: String,
        marker: String,
        at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 记录校验结果：只更新校验字段，不改变生命周期状态
    RecordVerification {
        execution_id: String,
        verification_status: VerificationStatus,
        integrity_verified: bool,
        at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 依赖图与溯源 ==========
    /// 追加依赖边（基础 -> 增量）
    AddDependency {
        base_id: String,
        dependent_id: String,
        tenant: Option<String>,
        at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 追加恢复溯源边
    AddRecoveryLink {
        recovery_id: String,
        backup_id: String,
        at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 追加调度与执行的关联
    AddScheduleLink {
        schedule_id: String,
        execution_id: String,
        at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 恢复操作 ==========
    CreateRecoveryEntity {
        id: String,
        tenant: Option<String>,
        created_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    AppendRecoveryVersion {
        recovery_id: String,
        at: DateTime<Utc>,
        attrs: Box<RecoveryVersionAttrs>,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    CurrentRecovery {
        recovery_id: String,
        respond_to: oneshot::Sender<Result<Option<RecoveryVersion>>>,
    },
    RecoveryHistory {
        recovery_id: String,
        respond_to: oneshot::Sender<Result<Vec<RecoveryVersion>>>,
    },

    // ========== 备份调度 ==========
    CreateScheduleEntity {
        id: String,
        tenant: Option<String>,
        created_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    AppendScheduleVersion {
        schedule_id: String,
        at: DateTime<Utc>,
        attrs: Box<ScheduleVersionAttrs>,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    CurrentSchedule {
        schedule_id: String,
        respond_to: oneshot::Sender<Result<Option<ScheduleVersion>>>,
    },
    /// 按名称查找调度（开放版本），用于重名校验
    ScheduleByName {
        name: String,
        respond_to: oneshot::Sender<Result<Option<ScheduleVersion>>>,
    },
    /// 所有调度的开放版本
    ListSchedules {
        respond_to: oneshot::Sender<Result<Vec<ScheduleVersion>>>,
    },
    /// 前瞻窗口内到期的活跃调度，按到期时间升序
    DueSchedules {
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
        respond_to: oneshot::Sender<Result<Vec<DueSchedule>>>,
    },
}
