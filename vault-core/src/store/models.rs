use crate::error::VaultError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 备份类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupType {
    Full,
    Incremental,
    Differential,
    PointInTime,
    Logical,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Incremental => "INCREMENTAL",
            Self::Differential => "DIFFERENTIAL",
            Self::PointInTime => "POINT_IN_TIME",
            Self::Logical => "LOGICAL",
        }
    }

    /// 增量和差异备份都需要基础备份
    pub fn needs_base(&self) -> bool {
        matches!(self, Self::Incremental | Self::Differential)
    }
}

impl FromStr for BackupType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULL" => Ok(Self::Full),
            "INCREMENTAL" => Ok(Self::Incremental),
            "DIFFERENTIAL" => Ok(Self::Differential),
            "POINT_IN_TIME" => Ok(Self::PointInTime),
            "LOGICAL" => Ok(Self::Logical),
            other => Err(VaultError::validation(format!("无效的备份类型: {other}"))),
        }
    }
}

/// 备份范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupScope {
    System,
    Tenant,
    Schema,
    Table,
}

impl BackupScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Tenant => "TENANT",
            Self::Schema => "SCHEMA",
            Self::Table => "TABLE",
        }
    }
}

impl FromStr for BackupScope {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM" => Ok(Self::System),
            "TENANT" => Ok(Self::Tenant),
            "SCHEMA" => Ok(Self::Schema),
            "TABLE" => Ok(Self::Table),
            other => Err(VaultError::validation(format!("无效的备份范围: {other}"))),
        }
    }
}

/// 备份执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Partial,
    Expired,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Partial => "PARTIAL",
            Self::Expired => "EXPIRED",
        }
    }

    /// 是否为终态（执行尝试不会再推进）
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl FromStr for ExecutionStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "PARTIAL" => Ok(Self::Partial),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(VaultError::validation(format!("无效的执行状态: {other}"))),
        }
    }
}

/// 校验状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
    Skipped,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "VERIFIED" => Ok(Self::Verified),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(VaultError::validation(format!("无效的校验状态: {other}"))),
        }
    }
}

/// 恢复类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryType {
    FullRestore,
    PointInTime,
    PartialRestore,
    TableRestore,
}

impl RecoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullRestore => "FULL_RESTORE",
            Self::PointInTime => "POINT_IN_TIME",
            Self::PartialRestore => "PARTIAL_RESTORE",
            Self::TableRestore => "TABLE_RESTORE",
        }
    }
}

impl FromStr for RecoveryType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULL_RESTORE" => Ok(Self::FullRestore),
            "POINT_IN_TIME" => Ok(Self::PointInTime),
            "PARTIAL_RESTORE" => Ok(Self::PartialRestore),
            "TABLE_RESTORE" => Ok(Self::TableRestore),
            other => Err(VaultError::validation(format!("无效的恢复类型: {other}"))),
        }
    }
}

/// 恢复操作状态
///
/// APPROVED 表示创建时免审批或审批已通过，可以进入执行阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStatus {
    Pending,
    Approved,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RecoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for RecoveryStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(VaultError::validation(format!("无效的恢复状态: {other}"))),
        }
    }
}

/// 实体身份记录（身份表的一行）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub tenant: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 备份执行的版本快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupVersion {
    pub version_id: i64,
    pub execution_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub attrs: BackupVersionAttrs,
}

/// 备份执行版本的业务属性（追加新版本时由调用方提供完整快照）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupVersionAttrs {
    pub backup_type: BackupType,
    pub scope: BackupScope,
    pub method: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub status: ExecutionStatus,
    pub raw_size: Option<i64>,
    pub compressed_size: Option<i64>,
    pub compression_ratio: Option<f64>,
    pub storage_location: Option<String>,
    pub file_name: Option<String>,
    pub storage_class: Option<String>,
    pub retention_days: Option<i64>,
    pub retention_policy: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub verification_status: VerificationStatus,
    pub checksum_algo: Option<String>,
    pub checksum: Option<String>,
    pub integrity_verified: bool,
    pub recovery_tested: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub initiator: Option<String>,
    pub priority: i32,
    pub metadata: Option<String>,
}

impl BackupVersionAttrs {
    /// 新执行尝试的初始（RUNNING）快照
    pub fn running(
        backup_type: BackupType,
        scope: BackupScope,
        started_at: DateTime<Utc>,
        initiator: Option<String>,
        max_retries: i32,
    ) -> Self {
        Self {
            backup_type,
            scope,
            method: None,
            started_at: Some(started_at),
            finished_at: None,
            duration_secs: None,
            status: ExecutionStatus::Running,
            raw_size: None,
            compressed_size: None,
            compression_ratio: None,
            storage_location: None,
            file_name: None,
            storage_class: None,
            retention_days: None,
            retention_policy: None,
            expires_at: None,
            verification_status: VerificationStatus::Pending,
            checksum_algo: None,
            checksum: None,
            integrity_verified: false,
            recovery_tested: false,
            verified_at: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            initiator,
            priority: 5,
            metadata: None,
        }
    }
}

/// 恢复操作的版本快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryVersion {
    pub version_id: i64,
    pub recovery_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub attrs: RecoveryVersionAttrs,
}

/// 恢复操作版本的业务属性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryVersionAttrs {
    pub recovery_type: RecoveryType,
    pub source_backup_id: String,
    pub target_timestamp: Option<DateTime<Utc>>,
    pub recovery_target: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RecoveryStatus,
    pub validation_outcome: Option<String>,
    pub records_recovered: Option<i64>,
    pub bytes_recovered: Option<i64>,
    pub success_rate: Option<f64>,
    pub error_message: Option<String>,
    pub initiator: Option<String>,
    pub approval_required: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub estimated_duration_secs: Option<i64>,
}

/// 备份调度的版本快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleVersion {
    pub version_id: i64,
    pub schedule_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub attrs: ScheduleVersionAttrs,
}

/// 备份调度版本的业务属性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleVersionAttrs {
    pub name: String,
    pub backup_type: BackupType,
    pub cadence: String,
    pub timezone: String,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub max_duration_secs: Option<i64>,
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub retention_days: Option<i64>,
    pub max_retained: Option<i32>,
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
    pub recipients: Option<String>,
    pub priority: i32,
    pub metadata: Option<String>,
}

/// 依赖图中的有向边：基础备份 -> 依赖它的增量备份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub base_id: String,
    pub dependent_id: String,
    pub tenant: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 恢复操作到来源备份的溯源边
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryLink {
    pub recovery_id: String,
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
}

/// 调度到其产生的备份执行的关联
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleLink {
    pub schedule_id: String,
    pub execution_id: String,
    pub created_at: DateTime<Utc>,
}

/// 调度查询结果：在前瞻窗口内到期的调度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueSchedule {
    pub schedule_id: String,
    pub tenant: Option<String>,
    pub name: String,
    pub backup_type: BackupType,
    pub cadence: String,
    pub next_run_at: DateTime<Utc>,
    pub max_duration_secs: Option<i64>,
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
    pub retention_days: Option<i64>,
}

/// 保留扫描的候选项：已完成且已过保留期的备份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiredCandidate {
    pub execution_id: String,
    pub tenant: Option<String>,
    pub file_name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub raw_size: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Partial,
            ExecutionStatus::Expired,
        ] {
            assert_eq!(s.as_str().parse::<ExecutionStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Expired.is_terminal());
    }

    #[test]
    fn test_invalid_backup_type() {
        assert!("SNAPSHOT".parse::<BackupType>().is_err());
        assert!(BackupType::Incremental.needs_base());
        assert!(!BackupType::Full.needs_base());
    }
}
