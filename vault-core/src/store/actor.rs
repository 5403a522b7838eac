use crate::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use duckdb::{Connection, ToSql, params};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::StoreMessage;
use super::models::{
    BackupVersion, BackupVersionAttrs, DueSchedule, EntityRecord, ExecutionStatus,
    ExpiredCandidate, RecoveryVersion, RecoveryVersionAttrs, ScheduleVersion,
    ScheduleVersionAttrs, VerificationStatus,
};

/// backup_version 表的查询列顺序，行映射与此保持一致
const BACKUP_COLS: &str = "id, execution_id, valid_from, valid_to, backup_type, scope, method, \
     started_at, finished_at, duration_secs, status, raw_size, compressed_size, \
     compression_ratio, storage_location, file_name, storage_class, retention_days, \
     retention_policy, expires_at, verification_status, checksum_algo, checksum, \
     integrity_verified, recovery_tested, verified_at, error_code, error_message, \
     retry_count, max_retries, initiator, priority, metadata";

const RECOVERY_COLS: &str = "id, recovery_id, valid_from, valid_to, recovery_type, source_backup_id, \
     target_timestamp, recovery_target, started_at, finished_at, status, validation_outcome, \
     records_recovered, bytes_recovered, success_rate, error_message, initiator, \
     approval_required, approved_by, approved_at, estimated_duration_secs";

const SCHEDULE_COLS: &str = "id, schedule_id, valid_from, valid_to, name, backup_type, cadence, \
     timezone, window_start, window_end, max_duration_secs, is_active, next_run_at, \
     last_run_at, run_count, retention_days, max_retained, notify_on_success, \
     notify_on_failure, recipients, priority, metadata";

/// 枚举列的解析辅助：把解析失败转成行映射错误
fn parse_col<T>(idx: usize, s: String) -> duckdb::Result<T>
where
    T: FromStr<Err = VaultError>,
{
    s.parse().map_err(|e: VaultError| {
        duckdb::Error::FromSqlConversionFailure(idx, duckdb::types::Type::Text, Box::new(e))
    })
}

fn row_to_backup_version(row: &duckdb::Row<'_>) -> duckdb::Result<BackupVersion> {
    Ok(BackupVersion {
        version_id: row.get(0)?,
        execution_id: row.get(1)?,
        valid_from: row.get(2)?,
        valid_to: row.get(3)?,
        attrs: BackupVersionAttrs {
            backup_type: parse_col(4, row.get::<_, String>(4)?)?,
            scope: parse_col(5, row.get::<_, String>(5)?)?,
            method: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
            duration_secs: row.get(9)?,
            status: parse_col(10, row.get::<_, String>(10)?)?,
            raw_size: row.get(11)?,
            compressed_size: row.get(12)?,
            compression_ratio: row.get(13)?,
            storage_location: row.get(14)?,
            file_name: row.get(15)?,
            storage_class: row.get(16)?,
            retention_days: row.get(17)?,
            retention_policy: row.get(18)?,
            expires_at: row.get(19)?,
            verification_status: parse_col(20, row.get::<_, String>(20)?)?,
            checksum_algo: row.get(21)?,
            checksum: row.get(22)?,
            integrity_verified: row.get(23)?,
            recovery_tested: row.get(24)?,
            verified_at: row.get(25)?,
            error_code: row.get(26)?,
            error_message: row.get(27)?,
            retry_count: row.get(28)?,
            max_retries: row.get(29)?,
            initiator: row.get(30)?,
            priority: row.get(31)?,
            metadata: row.get(32)?,
        },
    })
}

fn row_to_recovery_version(row: &duckdb::Row<'_>) -> duckdb::Result<RecoveryVersion> {
    Ok(RecoveryVersion {
        version_id: row.get(0)?,
        recovery_id: row.get(1)?,
        valid_from: row.get(2)?,
        valid_to: row.get(3)?,
        attrs: RecoveryVersionAttrs {
            recovery_type: parse_col(4, row.get::<_, String>(4)?)?,
            source_backup_id: row.get(5)?,
            target_timestamp: row.get(6)?,
            recovery_target: row.get(7)?,
            started_at: row.get(8)?,
            finished_at: row.get(9)?,
            status: parse_col(10, row.get::<_, String>(10)?)?,
            validation_outcome: row.get(11)?,
            records_recovered: row.get(12)?,
            bytes_recovered: row.get(13)?,
            success_rate: row.get(14)?,
            error_message: row.get(15)?,
            initiator: row.get(16)?,
            approval_required: row.get(17)?,
            approved_by: row.get(18)?,
            approved_at: row.get(19)?,
            estimated_duration_secs: row.get(20)?,
        },
    })
}

fn row_to_schedule_version(row: &duckdb::Row<'_>) -> duckdb::Result<ScheduleVersion> {
    Ok(ScheduleVersion {
        version_id: row.get(0)?,
        schedule_id: row.get(1)?,
        valid_from: row.get(2)?,
        valid_to: row.get(3)?,
        attrs: ScheduleVersionAttrs {
            name: row.get(4)?,
            backup_type: parse_col(5, row.get::<_, String>(5)?)?,
            cadence: row.get(6)?,
            timezone: row.get(7)?,
            window_start: row.get(8)?,
            window_end: row.get(9)?,
            max_duration_secs: row.get(10)?,
            is_active: row.get(11)?,
            next_run_at: row.get(12)?,
            last_run_at: row.get(13)?,
            run_count: row.get(14)?,
            retention_days: row.get(15)?,
            max_retained: row.get(16)?,
            notify_on_success: row.get(17)?,
            notify_on_failure: row.get(18)?,
            recipients: row.get(19)?,
            priority: row.get(20)?,
            metadata: row.get(21)?,
        },
    })
}

/// 存储Actor - 独占DuckDB连接，串行处理所有读写
pub struct StoreActor {
    connection: Connection,
}

impl StoreActor {
    /// 创建新的存储Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存存储Actor（测试用）
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<StoreMessage>) {
        info!("存储Actor已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("存储Actor已关闭");
    }

    fn handle_message(&mut self, message: StoreMessage) {
        match message {
            StoreMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            StoreMessage::CreateBackupEntity {
                id,
                tenant,
                created_at,
                respond_to,
            } => {
                let result = self.create_entity("backup_execution", &id, &tenant, created_at);
                let _ = respond_to.send(result);
            }
            StoreMessage::GetBackupEntity { id, respond_to } => {
                let _ = respond_to.send(self.get_entity("backup_execution", &id));
            }
            StoreMessage::AppendBackupVersion {
                execution_id,
                at,
                attrs,
                respond_to,
            } => {
                let result = self.append_backup_version(&execution_id, at, &attrs);
                let _ = respond_to.send(result);
            }
            StoreMessage::CurrentBackup {
                execution_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.current_backup(&execution_id));
            }
            StoreMessage::BackupHistory {
                execution_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.backup_history(&execution_id));
            }
            StoreMessage::ListBackups { tenant, respond_to } => {
                let _ = respond_to.send(self.list_backups(&tenant));
            }
            StoreMessage::LatestCompletedFull { tenant, respond_to } => {
                let _ = respond_to.send(self.latest_completed_full(&tenant));
            }
            StoreMessage::RecoveryFloor {
                tenant,
                target,
                respond_to,
            } => {
                let _ = respond_to.send(self.recovery_floor(&tenant, target));
            }
            StoreMessage::ExpiredCandidates {
                tenant,
                now,
                respond_to,
            } => {
                let _ = respond_to.send(self.expired_candidates(&tenant, now));
            }
            StoreMessage::LiveDependentCount {
                base_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.live_dependent_count(&base_id));
            }
            StoreMessage::ExpireBackup {
                execution_id,
                marker,
                at,
                respond_to,
            } => {
                let _ = respond_to.send(self.expire_backup(&execution_id, &marker, at));
            }
            StoreMessage::RecordVerification {
                execution_id,
                verification_status,
                integrity_verified,
                at,
                respond_to,
            } => {
                let result = self.record_verification(
                    &execution_id,
                    verification_status,
                    integrity_verified,
                    at,
                );
                let _ = respond_to.send(result);
            }
            StoreMessage::AddDependency {
                base_id,
                dependent_id,
                tenant,
                at,
                respond_to,
            } => {
                let result = self.add_dependency(&base_id, &dependent_id, &tenant, at);
                let _ = respond_to.send(result);
            }
            StoreMessage::AddRecoveryLink {
                recovery_id,
                backup_id,
                at,
                respond_to,
            } => {
                let result = self.connection.execute(
                    "INSERT INTO recovery_backup_link (recovery_id, backup_id, created_at)
                     VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                    params![recovery_id, backup_id, at],
                );
                let _ = respond_to.send(result.map(|_| ()).map_err(Into::into));
            }
            StoreMessage::AddScheduleLink {
                schedule_id,
                execution_id,
                at,
                respond_to,
            } => {
                let result = self.connection.execute(
                    "INSERT INTO schedule_execution_link (schedule_id, execution_id, created_at)
                     VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                    params![schedule_id, execution_id, at],
                );
                let _ = respond_to.send(result.map(|_| ()).map_err(Into::into));
            }
            StoreMessage::CreateRecoveryEntity {
                id,
                tenant,
                created_at,
                respond_to,
            } => {
                let result = self.create_entity("recovery_operation", &id, &tenant, created_at);
                let _ = respond_to.send(result);
            }
            StoreMessage::AppendRecoveryVersion {
                recovery_id,
                at,
                attrs,
                respond_to,
            } => {
                let _ = respond_to.send(self.append_recovery_version(&recovery_id, at, &attrs));
            }
            StoreMessage::CurrentRecovery {
                recovery_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.current_recovery(&recovery_id));
            }
            StoreMessage::RecoveryHistory {
                recovery_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.recovery_history(&recovery_id));
            }
            StoreMessage::CreateScheduleEntity {
                id,
                tenant,
                created_at,
                respond_to,
            } => {
                let result = self.create_entity("backup_schedule", &id, &tenant, created_at);
                let _ = respond_to.send(result);
            }
            StoreMessage::AppendScheduleVersion {
                schedule_id,
                at,
                attrs,
                respond_to,
            } => {
                let _ = respond_to.send(self.append_schedule_version(&schedule_id, at, &attrs));
            }
            StoreMessage::CurrentSchedule {
                schedule_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.current_schedule(&schedule_id));
            }
            StoreMessage::ScheduleByName { name, respond_to } => {
                let _ = respond_to.send(self.schedule_by_name(&name));
            }
            StoreMessage::ListSchedules { respond_to } => {
                let _ = respond_to.send(self.list_schedules());
            }
            StoreMessage::DueSchedules {
                from,
                until,
                limit,
                respond_to,
            } => {
                let _ = respond_to.send(self.due_schedules(from, until, limit));
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化元数据库表...");

        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';').filter(|s| !s.trim().is_empty()) {
            let trimmed = statement.trim();

            // 跳过纯注释段
            let is_only_comments = trimmed
                .lines()
                .map(|line| line.trim())
                .all(|line| line.is_empty() || line.starts_with("--"));
            if is_only_comments {
                continue;
            }

            self.connection.execute(trimmed, [])?;
        }

        info!("元数据库表初始化完成");
        Ok(())
    }

    /// 创建实体身份（幂等：派生ID冲突时忽略）
    fn create_entity(
        &mut self,
        table: &str,
        id: &str,
        tenant: &Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {table} (id, tenant, created_at) VALUES (?, ?, ?) ON CONFLICT DO NOTHING"
        );
        let inserted = self.connection.execute(&sql, params![id, tenant, created_at])?;
        Ok(inserted > 0)
    }

    fn get_entity(&mut self, table: &str, id: &str) -> Result<Option<EntityRecord>> {
        let sql = format!("SELECT id, tenant, created_at FROM {table} WHERE id = ?");
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(EntityRecord {
                id: row.get(0)?,
                tenant: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 关闭指定身份的开放版本，返回是否有版本被关闭
    fn close_open_version(
        &mut self,
        table: &str,
        fk_col: &str,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!("UPDATE {table} SET valid_to = ? WHERE {fk_col} = ? AND valid_to IS NULL");
        let closed = self.connection.execute(&sql, params![at, id])?;
        Ok(closed > 0)
    }

    fn append_backup_version(
        &mut self,
        execution_id: &str,
        at: DateTime<Utc>,
        attrs: &BackupVersionAttrs,
    ) -> Result<i64> {
        self.close_open_version("backup_version", "execution_id", execution_id, at)?;
        self.insert_backup_version(execution_id, at, attrs)
    }

    fn insert_backup_version(
        &mut self,
        execution_id: &str,
        valid_from: DateTime<Utc>,
        a: &BackupVersionAttrs,
    ) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO backup_version (
                execution_id, valid_from, valid_to, backup_type, scope, method,
                started_at, finished_at, duration_secs, status, raw_size, compressed_size,
                compression_ratio, storage_location, file_name, storage_class, retention_days,
                retention_policy, expires_at, verification_status, checksum_algo, checksum,
                integrity_verified, recovery_tested, verified_at, error_code, error_message,
                retry_count, max_retries, initiator, priority, metadata
             ) VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                execution_id,
                valid_from,
                a.backup_type.as_str(),
                a.scope.as_str(),
                a.method,
                a.started_at,
                a.finished_at,
                a.duration_secs,
                a.status.as_str(),
                a.raw_size,
                a.compressed_size,
                a.compression_ratio,
                a.storage_location,
                a.file_name,
                a.storage_class,
                a.retention_days,
                a.retention_policy,
                a.expires_at,
                a.verification_status.as_str(),
                a.checksum_algo,
                a.checksum,
                a.integrity_verified,
                a.recovery_tested,
                a.verified_at,
                a.error_code,
                a.error_message,
                a.retry_count,
                a.max_retries,
                a.initiator,
                a.priority,
                a.metadata,
            ],
        )?;

        let id: i64 = self
            .connection
            .query_row("SELECT currval('backup_version_seq')", [], |row| row.get(0))?;
        Ok(id)
    }

    fn current_backup(&mut self, execution_id: &str) -> Result<Option<BackupVersion>> {
        let sql = format!(
            "SELECT {BACKUP_COLS} FROM backup_version WHERE execution_id = ? AND valid_to IS NULL"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query_map(params![execution_id], row_to_backup_version)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn backup_history(&mut self, execution_id: &str) -> Result<Vec<BackupVersion>> {
        let sql = format!(
            "SELECT {BACKUP_COLS} FROM backup_version WHERE execution_id = ? ORDER BY valid_from, id"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(params![execution_id], row_to_backup_version)?;

        let mut versions = Vec::new();
        for v in rows {
            versions.push(v?);
        }
        Ok(versions)
    }

    fn list_backups(&mut self, tenant: &Option<String>) -> Result<Vec<BackupVersion>> {
        let tenant_clause = if tenant.is_some() {
            "e.tenant = ?"
        } else {
            "e.tenant IS NULL"
        };
        let sql = format!(
            "SELECT {BACKUP_COLS} FROM backup_version v
             JOIN backup_execution e ON e.id = v.execution_id
             WHERE v.valid_to IS NULL AND {tenant_clause}
             ORDER BY v.started_at DESC"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut binds: Vec<&dyn ToSql> = Vec::new();
        if let Some(t) = tenant {
            binds.push(t);
        }
        let rows = stmt.query_map(binds.as_slice(), row_to_backup_version)?;

        let mut versions = Vec::new();
        for v in rows {
            versions.push(v?);
        }
        Ok(versions)
    }

    fn latest_completed_full(&mut self, tenant: &Option<String>) -> Result<Option<BackupVersion>> {
        let tenant_clause = if tenant.is_some() {
            "e.tenant = ?"
        } else {
            "e.tenant IS NULL"
        };
        let sql = format!(
            "SELECT {BACKUP_COLS} FROM backup_version v
             JOIN backup_execution e ON e.id = v.execution_id
             WHERE v.valid_to IS NULL
               AND v.status = 'COMPLETED'
               AND v.backup_type = 'FULL'
               AND {tenant_clause}
             ORDER BY v.started_at DESC
             LIMIT 1"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut binds: Vec<&dyn ToSql> = Vec::new();
        if let Some(t) = tenant {
            binds.push(t);
        }
        let mut rows = stmt.query_map(binds.as_slice(), row_to_backup_version)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 恢复下限查询：开始时间不晚于目标时间点的最新已完成备份
    fn recovery_floor(
        &mut self,
        tenant: &Option<String>,
        target: DateTime<Utc>,
    ) -> Result<Option<BackupVersion>> {
        let tenant_clause = if tenant.is_some() {
            "e.tenant = ?"
        } else {
            "e.tenant IS NULL"
        };
        let sql = format!(
            "SELECT {BACKUP_COLS} FROM backup_version v
             JOIN backup_execution e ON e.id = v.execution_id
             WHERE v.valid_to IS NULL
               AND v.status = 'COMPLETED'
               AND v.backup_type IN ('FULL', 'INCREMENTAL')
               AND v.started_at <= ?
               AND {tenant_clause}
             ORDER BY v.started_at DESC
             LIMIT 1"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut binds: Vec<&dyn ToSql> = vec![&target];
        if let Some(t) = tenant {
            binds.push(t);
        }
        let mut rows = stmt.query_map(binds.as_slice(), row_to_backup_version)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn expired_candidates(
        &mut self,
        tenant: &Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredCandidate>> {
        // tenant 为 None 时扫描所有租户（含系统级）
        let tenant_clause = if tenant.is_some() { "AND e.tenant = ?" } else { "" };
        let sql = format!(
            "SELECT e.id, e.tenant, v.file_name, v.expires_at, v.raw_size
             FROM backup_version v
             JOIN backup_execution e ON e.id = v.execution_id
             WHERE v.valid_to IS NULL
               AND v.status = 'COMPLETED'
               AND v.expires_at IS NOT NULL
               AND v.expires_at < ?
               {tenant_clause}
             ORDER BY v.expires_at"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut binds: Vec<&dyn ToSql> = vec![&now];
        if let Some(t) = tenant {
            binds.push(t);
        }
        let rows = stmt.query_map(binds.as_slice(), |row| {
            Ok(ExpiredCandidate {
                execution_id: row.get(0)?,
                tenant: row.get(1)?,
                file_name: row.get(2)?,
                expires_at: row.get(3)?,
                raw_size: row.get(4)?,
            })
        })?;

        let mut candidates = Vec::new();
        for c in rows {
            candidates.push(c?);
        }
        Ok(candidates)
    }

    fn live_dependent_count(&mut self, base_id: &str) -> Result<i64> {
        let count = self.connection.query_row(
            "SELECT COUNT(*)
             FROM backup_dependency d
             JOIN backup_version v
               ON v.execution_id = d.dependent_id AND v.valid_to IS NULL
             WHERE d.base_id = ? AND v.status != 'EXPIRED'",
            params![base_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 过期转换：关闭开放版本并追加EXPIRED终态版本（单个Actor回合内完成）
    fn expire_backup(&mut self, execution_id: &str, marker: &str, at: DateTime<Utc>) -> Result<()> {
        let current = self
            .current_backup(execution_id)?
            .ok_or_else(|| VaultError::not_found(format!("备份执行 {execution_id}")))?;

        // 过期转换要求当前状态必须是COMPLETED
        if current.attrs.status != ExecutionStatus::Completed {
            return Err(VaultError::validation(format!(
                "备份 {execution_id} 当前状态为 {}，只有COMPLETED状态可以过期",
                current.attrs.status.as_str()
            )));
        }

        let mut attrs = current.attrs;
        attrs.status = ExecutionStatus::Expired;
        attrs.initiator = Some(marker.to_string());
        attrs.metadata = Some(
            serde_json::json!({
                "cleanup_at": at.to_rfc3339(),
                "expired_by": marker,
            })
            .to_string(),
        );

        self.close_open_version("backup_version", "execution_id", execution_id, at)?;
        self.insert_backup_version(execution_id, at, &attrs)?;
        Ok(())
    }

    /// 记录校验结果：只改校验字段，生命周期状态保持不变。
    /// 落库的校验和是备份完成时的基准值，校验路径永不改写它。
    fn record_verification(
        &mut self,
        execution_id: &str,
        verification_status: VerificationStatus,
        integrity_verified: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let current = self
            .current_backup(execution_id)?
            .ok_or_else(|| VaultError::not_found(format!("备份执行 {execution_id}")))?;

        let mut attrs = current.attrs;
        attrs.verification_status = verification_status;
        attrs.integrity_verified = integrity_verified;
        attrs.verified_at = Some(at);

        self.close_open_version("backup_version", "execution_id", execution_id, at)?;
        self.insert_backup_version(execution_id, at, &attrs)?;
        Ok(())
    }

    fn add_dependency(
        &mut self,
        base_id: &str,
        dependent_id: &str,
        tenant: &Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        // 依赖图不允许自环
        if base_id == dependent_id {
            return Err(VaultError::SelfDependency(base_id.to_string()));
        }

        self.connection.execute(
            "INSERT INTO backup_dependency (base_id, dependent_id, tenant, created_at)
             VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
            params![base_id, dependent_id, tenant, at],
        )?;
        Ok(())
    }

    fn append_recovery_version(
        &mut self,
        recovery_id: &str,
        at: DateTime<Utc>,
        a: &RecoveryVersionAttrs,
    ) -> Result<i64> {
        self.close_open_version("recovery_version", "recovery_id", recovery_id, at)?;

        self.connection.execute(
            "INSERT INTO recovery_version (
                recovery_id, valid_from, valid_to, recovery_type, source_backup_id,
                target_timestamp, recovery_target, started_at, finished_at, status,
                validation_outcome, records_recovered, bytes_recovered, success_rate,
                error_message, initiator, approval_required, approved_by, approved_at,
                estimated_duration_secs
             ) VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                recovery_id,
                at,
                a.recovery_type.as_str(),
                a.source_backup_id,
                a.target_timestamp,
                a.recovery_target,
                a.started_at,
                a.finished_at,
                a.status.as_str(),
                a.validation_outcome,
                a.records_recovered,
                a.bytes_recovered,
                a.success_rate,
                a.error_message,
                a.initiator,
                a.approval_required,
                a.approved_by,
                a.approved_at,
                a.estimated_duration_secs,
            ],
        )?;

        let id: i64 = self.connection.query_row(
            "SELECT currval('recovery_version_seq')",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn current_recovery(&mut self, recovery_id: &str) -> Result<Option<RecoveryVersion>> {
        let sql = format!(
            "SELECT {RECOVERY_COLS} FROM recovery_version WHERE recovery_id = ? AND valid_to IS NULL"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query_map(params![recovery_id], row_to_recovery_version)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn recovery_history(&mut self, recovery_id: &str) -> Result<Vec<RecoveryVersion>> {
        let sql = format!(
            "SELECT {RECOVERY_COLS} FROM recovery_version WHERE recovery_id = ? ORDER BY valid_from, id"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(params![recovery_id], row_to_recovery_version)?;

        let mut versions = Vec::new();
        for v in rows {
            versions.push(v?);
        }
        Ok(versions)
    }

    fn append_schedule_version(
        &mut self,
        schedule_id: &str,
        at: DateTime<Utc>,
        a: &ScheduleVersionAttrs,
    ) -> Result<i64> {
        self.close_open_version("schedule_version", "schedule_id", schedule_id, at)?;

        self.connection.execute(
            "INSERT INTO schedule_version (
                schedule_id, valid_from, valid_to, name, backup_type, cadence, timezone,
                window_start, window_end, max_duration_secs, is_active, next_run_at,
                last_run_at, run_count, retention_days, max_retained, notify_on_success,
                notify_on_failure, recipients, priority, metadata
             ) VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                schedule_id,
                at,
                a.name,
                a.backup_type.as_str(),
                a.cadence,
                a.timezone,
                a.window_start,
                a.window_end,
                a.max_duration_secs,
                a.is_active,
                a.next_run_at,
                a.last_run_at,
                a.run_count,
                a.retention_days,
                a.max_retained,
                a.notify_on_success,
                a.notify_on_failure,
                a.recipients,
                a.priority,
                a.metadata,
            ],
        )?;

        let id: i64 = self.connection.query_row(
            "SELECT currval('schedule_version_seq')",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn current_schedule(&mut self, schedule_id: &str) -> Result<Option<ScheduleVersion>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLS} FROM schedule_version WHERE schedule_id = ? AND valid_to IS NULL"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query_map(params![schedule_id], row_to_schedule_version)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn schedule_by_name(&mut self, name: &str) -> Result<Option<ScheduleVersion>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLS} FROM schedule_version WHERE name = ? AND valid_to IS NULL LIMIT 1"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query_map(params![name], row_to_schedule_version)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn list_schedules(&mut self) -> Result<Vec<ScheduleVersion>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLS} FROM schedule_version WHERE valid_to IS NULL ORDER BY name"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_schedule_version)?;

        let mut versions = Vec::new();
        for v in rows {
            versions.push(v?);
        }
        Ok(versions)
    }

    fn due_schedules(
        &mut self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DueSchedule>> {
        let mut stmt = self.connection.prepare(
            "SELECT v.schedule_id, e.tenant, v.name, v.backup_type, v.cadence, v.next_run_at,
                    v.max_duration_secs, v.notify_on_success, v.notify_on_failure, v.retention_days
             FROM schedule_version v
             JOIN backup_schedule e ON e.id = v.schedule_id
             WHERE v.valid_to IS NULL
               AND v.is_active
               AND v.next_run_at IS NOT NULL
               AND v.next_run_at >= ?
               AND v.next_run_at <= ?
             ORDER BY v.next_run_at
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![from, until, limit], |row| {
            Ok(DueSchedule {
                schedule_id: row.get(0)?,
                tenant: row.get(1)?,
                name: row.get(2)?,
                backup_type: parse_col(3, row.get::<_, String>(3)?)?,
                cadence: row.get(4)?,
                next_run_at: row.get(5)?,
                max_duration_secs: row.get(6)?,
                notify_on_success: row.get(7)?,
                notify_on_failure: row.get(8)?,
                retention_days: row.get(9)?,
            })
        })?;

        let mut due = Vec::new();
        for d in rows {
            due.push(d?);
        }
        if !due.is_empty() {
            debug!("发现 {} 个到期调度", due.len());
        }
        Ok(due)
    }
}
