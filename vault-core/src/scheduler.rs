use crate::{
    VaultError,
    constants::scheduler as defaults,
    error::Result,
    keys::{self, EntityKind},
    store::{BackupType, DueSchedule, ScheduleVersion, ScheduleVersionAttrs, StoreManager},
};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use tracing::info;
use uuid::Uuid;

/// 调度节奏
///
/// 支持两种表达：固定间隔（every:30m）和每日定点（daily:02:30）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// 固定间隔
    Every(ChronoDuration),
    /// 每日在UTC的固定时刻
    Daily(NaiveTime),
}

impl Cadence {
    /// 解析节奏表达式："every:<n><s|m|h|d>" 或 "daily:HH:MM"
    pub fn parse(expr: &str) -> Result<Self> {
        if let Some(interval) = expr.strip_prefix("every:") {
            let interval = interval.trim();
            if interval.len() < 2 {
                return Err(VaultError::validation(format!("无效的节奏表达式: {expr}")));
            }
            let (number, unit) = interval.split_at(interval.len() - 1);
            let n: i64 = number
                .parse()
                .map_err(|_| VaultError::validation(format!("无效的节奏表达式: {expr}")))?;
            if n <= 0 {
                return Err(VaultError::validation(format!(
                    "节奏间隔必须为正数: {expr}"
                )));
            }
            let duration = match unit {
                "s" => ChronoDuration::seconds(n),
                "m" => ChronoDuration::minutes(n),
                "h" => ChronoDuration::hours(n),
                "d" => ChronoDuration::days(n),
                other => {
                    return Err(VaultError::validation(format!(
                        "无效的节奏单位 '{other}'，支持 s/m/h/d"
                    )));
                }
            };
            return Ok(Self::Every(duration));
        }

        if let Some(time) = expr.strip_prefix("daily:") {
            let parsed = NaiveTime::parse_from_str(time.trim(), "%H:%M")
                .map_err(|_| VaultError::validation(format!("无效的每日时刻: {expr}")))?;
            return Ok(Self::Daily(parsed));
        }

        Err(VaultError::validation(format!(
            "无法识别的节奏表达式: {expr}，支持 every:<n><s|m|h|d> 或 daily:HH:MM"
        )))
    }

    /// 给定时刻之后的下一次触发时间（严格晚于after）
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Every(interval) => after + *interval,
            Self::Daily(time) => {
                let today = after
                    .date_naive()
                    .and_hms_opt(time.hour(), time.minute(), 0)
                    .unwrap_or_else(|| after.naive_utc())
                    .and_utc();
                if today > after {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }
}

/// 创建调度的请求
#[derive(Debug, Clone)]
pub struct CreateScheduleRequest {
    pub tenant: Option<String>,
    /// 调度名称（全局唯一）
    pub name: String,
    pub backup_type: BackupType,
    /// 节奏表达式
    pub cadence: String,
    /// 允许执行的窗口起点 "HH:MM"（可选）
    pub window_start: Option<String>,
    /// 允许执行的窗口终点 "HH:MM"（可选）
    pub window_end: Option<String>,
    pub max_duration_secs: Option<i64>,
    pub retention_days: Option<i64>,
    pub max_retained: Option<i32>,
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
    pub recipients: Option<String>,
}

impl CreateScheduleRequest {
    pub fn new(name: impl Into<String>, backup_type: BackupType, cadence: impl Into<String>) -> Self {
        Self {
            tenant: None,
            name: name.into(),
            backup_type,
            cadence: cadence.into(),
            window_start: None,
            window_end: None,
            max_duration_secs: None,
            retention_days: None,
            max_retained: None,
            notify_on_success: false,
            notify_on_failure: true,
            recipients: None,
        }
    }
}

/// 备份调度管理器
#[derive(Clone)]
pub struct ScheduleManager {
    store: StoreManager,
}

impl ScheduleManager {
    pub fn new(store: StoreManager) -> Self {
        Self { store }
    }

    /// 创建备份调度
    ///
    /// 调度名称不能重复；只有会产生持久产物的类型可被调度。
    pub async fn create_schedule(&self, req: CreateScheduleRequest) -> Result<String> {
        let now = Utc::now();

        if req.name.trim().is_empty() {
            return Err(VaultError::validation("调度名称不能为空"));
        }
        if !matches!(
            req.backup_type,
            BackupType::Full | BackupType::Incremental | BackupType::Differential
        ) {
            return Err(VaultError::validation(format!(
                "备份类型 {} 不支持调度",
                req.backup_type.as_str()
            )));
        }

        let cadence = Cadence::parse(&req.cadence)?;
        validate_window(&req.window_start, &req.window_end)?;

        if self.store.schedule_by_name(&req.name).await?.is_some() {
            return Err(VaultError::validation(format!(
                "调度名称已存在: {}",
                req.name
            )));
        }

        let schedule_id = keys::derive_id(
            EntityKind::Schedule,
            req.tenant.as_deref(),
            now,
            Some(&Uuid::new_v4().to_string()),
        );
        self.store
            .create_schedule_entity(&schedule_id, req.tenant.clone(), now)
            .await?;

        let attrs = ScheduleVersionAttrs {
            name: req.name.clone(),
            backup_type: req.backup_type,
            cadence: req.cadence.clone(),
            timezone: defaults::DEFAULT_TIMEZONE.to_string(),
            window_start: req.window_start.clone(),
            window_end: req.window_end.clone(),
            max_duration_secs: req.max_duration_secs,
            is_active: true,
            next_run_at: Some(cadence.next_after(now)),
            last_run_at: None,
            run_count: 0,
            retention_days: req.retention_days,
            max_retained: req.max_retained,
            notify_on_success: req.notify_on_success,
            notify_on_failure: req.notify_on_failure,
            recipients: req.recipients.clone(),
            priority: 5,
            metadata: None,
        };
        self.store
            .append_schedule_version(&schedule_id, now, attrs)
            .await?;

        info!(schedule_id = %schedule_id, name = %req.name, "已创建备份调度");
        Ok(schedule_id)
    }

    /// 启用或停用调度
    pub async fn set_active(&self, schedule_id: &str, active: bool) -> Result<()> {
        let now = Utc::now();
        let current = self
            .store
            .current_schedule(schedule_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("调度 {schedule_id}")))?;

        let mut attrs = current.attrs;
        attrs.is_active = active;
        self.store
            .append_schedule_version(schedule_id, now, attrs)
            .await?;
        info!(schedule_id = %schedule_id, active, "调度状态已更新");
        Ok(())
    }

    /// 前瞻窗口内到期的调度，按到期时间升序
    pub async fn due_schedules(
        &self,
        now: DateTime<Utc>,
        lookahead: ChronoDuration,
        limit: u32,
    ) -> Result<Vec<DueSchedule>> {
        self.store.due_schedules(now, now + lookahead, limit).await
    }

    /// 记录一次派发：推进next_run_at、累加run_count
    ///
    /// 在派发瞬间调用，执行耗时不影响下一次触发时间。
    pub async fn mark_dispatched(
        &self,
        schedule_id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> Result<()> {
        let current = self
            .store
            .current_schedule(schedule_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("调度 {schedule_id}")))?;

        let cadence = Cadence::parse(&current.attrs.cadence)?;
        let mut attrs = current.attrs;
        attrs.last_run_at = Some(dispatched_at);
        attrs.next_run_at = Some(cadence.next_after(dispatched_at));
        attrs.run_count += 1;

        self.store
            .append_schedule_version(schedule_id, dispatched_at, attrs)
            .await?;
        Ok(())
    }

    /// 关联调度与其产生的备份执行
    pub async fn link_execution(&self, schedule_id: &str, execution_id: &str) -> Result<()> {
        self.store
            .add_schedule_link(schedule_id, execution_id, Utc::now())
            .await
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleVersion>> {
        self.store.list_schedules().await
    }

    pub async fn schedule_by_name(&self, name: &str) -> Result<Option<ScheduleVersion>> {
        self.store.schedule_by_name(name).await
    }
}

/// 执行窗口校验：两端要么都给要么都不给，且格式合法
fn validate_window(start: &Option<String>, end: &Option<String>) -> Result<()> {
    match (start, end) {
        (None, None) => Ok(()),
        (Some(s), Some(e)) => {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|_| VaultError::validation(format!("无效的窗口起点: {s}")))?;
            NaiveTime::parse_from_str(e, "%H:%M")
                .map_err(|_| VaultError::validation(format!("无效的窗口终点: {e}")))?;
            Ok(())
        }
        _ => Err(VaultError::validation(
            "执行窗口必须同时给出起点和终点",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_parse_every() {
        assert_eq!(
            Cadence::parse("every:30m").unwrap(),
            Cadence::Every(ChronoDuration::minutes(30))
        );
        assert_eq!(
            Cadence::parse("every:1d").unwrap(),
            Cadence::Every(ChronoDuration::days(1))
        );
        assert!(Cadence::parse("every:0m").is_err());
        assert!(Cadence::parse("every:5x").is_err());
        assert!(Cadence::parse("weekly:mon").is_err());
    }

    #[test]
    fn test_cadence_parse_daily() {
        let c = Cadence::parse("daily:02:30").unwrap();
        assert_eq!(c, Cadence::Daily(NaiveTime::from_hms_opt(2, 30, 0).unwrap()));
        assert!(Cadence::parse("daily:25:00").is_err());
    }

    #[test]
    fn test_next_after_every() {
        let now = Utc::now();
        let c = Cadence::parse("every:1h").unwrap();
        assert_eq!(c.next_after(now), now + ChronoDuration::hours(1));
    }

    #[test]
    fn test_next_after_daily_rolls_over() {
        let c = Cadence::parse("daily:02:00").unwrap();
        let at_three = "2026-08-29T03:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = c.next_after(at_three);
        assert_eq!(next, "2026-08-30T02:00:00Z".parse::<DateTime<Utc>>().unwrap());

        let at_one = "2026-08-29T01:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            c.next_after(at_one),
            "2026-08-29T02:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_schedule_and_duplicate_name() {
        let store = StoreManager::new_memory().await.unwrap();
        let mgr = ScheduleManager::new(store);

        let id = mgr
            .create_schedule(CreateScheduleRequest::new(
                "nightly-full",
                BackupType::Full,
                "daily:02:00",
            ))
            .await
            .unwrap();
        assert!(id.starts_with("sc-"));

        let err = mgr
            .create_schedule(CreateScheduleRequest::new(
                "nightly-full",
                BackupType::Incremental,
                "every:4h",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unschedulable_type_rejected() {
        let store = StoreManager::new_memory().await.unwrap();
        let mgr = ScheduleManager::new(store);

        let err = mgr
            .create_schedule(CreateScheduleRequest::new(
                "pitr-sched",
                BackupType::PointInTime,
                "every:1h",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_due_schedules_window_and_order() {
        let store = StoreManager::new_memory().await.unwrap();
        let mgr = ScheduleManager::new(store);
        let now = Utc::now();

        // every:1h 在一小时后到期，落在前瞻窗口内
        mgr.create_schedule(CreateScheduleRequest::new(
            "hourly-inc",
            BackupType::Incremental,
            "every:1h",
        ))
        .await
        .unwrap();
        // every:30m 更早到期，应排在前面
        mgr.create_schedule(CreateScheduleRequest::new(
            "half-hourly",
            BackupType::Incremental,
            "every:30m",
        ))
        .await
        .unwrap();
        // every:2d 远在窗口之外
        mgr.create_schedule(CreateScheduleRequest::new(
            "slow-full",
            BackupType::Full,
            "every:2d",
        ))
        .await
        .unwrap();

        let due = mgr
            .due_schedules(now, ChronoDuration::hours(2), 50)
            .await
            .unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].name, "half-hourly");
        assert_eq!(due[1].name, "hourly-inc");

        // limit截断
        let due = mgr
            .due_schedules(now, ChronoDuration::hours(2), 1)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "half-hourly");
    }

    #[tokio::test]
    async fn test_mark_dispatched_advances_next_run() {
        let store = StoreManager::new_memory().await.unwrap();
        let mgr = ScheduleManager::new(store);

        let id = mgr
            .create_schedule(CreateScheduleRequest::new(
                "hourly-inc",
                BackupType::Incremental,
                "every:1h",
            ))
            .await
            .unwrap();

        let dispatched_at = Utc::now() + ChronoDuration::hours(1);
        mgr.mark_dispatched(&id, dispatched_at).await.unwrap();

        let current = mgr.store.current_schedule(&id).await.unwrap().unwrap();
        assert_eq!(current.attrs.run_count, 1);
        assert_eq!(current.attrs.last_run_at, Some(dispatched_at));
        assert_eq!(
            current.attrs.next_run_at,
            Some(dispatched_at + ChronoDuration::hours(1))
        );
    }

    #[tokio::test]
    async fn test_inactive_schedule_not_due() {
        let store = StoreManager::new_memory().await.unwrap();
        let mgr = ScheduleManager::new(store);

        let id = mgr
            .create_schedule(CreateScheduleRequest::new(
                "paused",
                BackupType::Full,
                "every:1m",
            ))
            .await
            .unwrap();
        mgr.set_active(&id, false).await.unwrap();

        let due = mgr
            .due_schedules(Utc::now(), ChronoDuration::hours(1), 50)
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn test_window_validation() {
        assert!(validate_window(&None, &None).is_ok());
        assert!(validate_window(&Some("01:00".into()), &Some("05:00".into())).is_ok());
        assert!(validate_window(&Some("01:00".into()), &None).is_err());
        assert!(validate_window(&Some("25:00".into()), &Some("05:00".into())).is_err());
    }
}
