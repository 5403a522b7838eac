use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// 一次实体状态转换的审计事件
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub entity_kind: &'static str,
    pub entity_id: String,
    pub tenant: Option<String>,
    pub from_status: Option<String>,
    pub to_status: String,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// 审计/事件日志接收端
///
/// 每次状态转换都应发出一条事件。写入失败不能影响编排流程，
/// 但必须以警告形式暴露出来。
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// 默认实现：把审计事件写进结构化日志
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        info!(
            entity_kind = event.entity_kind,
            entity_id = %event.entity_id,
            tenant = ?event.tenant,
            from = ?event.from_status,
            to = %event.to_status,
            detail = ?event.detail,
            "实体状态转换"
        );
        Ok(())
    }
}

/// 发出审计事件；失败只告警，不中断编排
pub async fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    let entity_id = event.entity_id.clone();
    if let Err(e) = sink.record(event).await {
        warn!(entity_id = %entity_id, "审计事件写入失败: {}", e);
    }
}

/// 调度产生的执行结果通知
#[derive(Debug, Clone)]
pub struct Notification {
    pub schedule_name: String,
    pub tenant: Option<String>,
    pub execution_id: String,
    pub success: bool,
    pub message: String,
}

/// 通知通道（按调度配置的成功/失败开关触发，发后即忘）
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// 默认实现：通知走日志
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        if notification.success {
            info!(
                schedule = %notification.schedule_name,
                execution_id = %notification.execution_id,
                "调度执行成功: {}",
                notification.message
            );
        } else {
            warn!(
                schedule = %notification.schedule_name,
                execution_id = %notification.execution_id,
                "调度执行失败: {}",
                notification.message
            );
        }
        Ok(())
    }
}
