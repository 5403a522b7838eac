use crate::{
    VaultError,
    engine::BackupEngine,
    error::Result,
    events::{AuditEvent, AuditSink, emit},
    store::{ExecutionStatus, StoreManager, VerificationStatus},
};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 一次完整性校验的结论
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub execution_id: String,
    pub status: VerificationStatus,
    pub checksum_match: bool,
    pub structure_ok: bool,
}

/// 备份完整性校验器
///
/// 对已完成的备份复算校验和并做结构检查，结论以纯校验版本
/// 追加到版本历史：只更新校验相关字段，其余业务属性原样保留。
#[derive(Clone)]
pub struct Verifier {
    store: StoreManager,
    engine: Arc<dyn BackupEngine>,
    audit: Arc<dyn AuditSink>,
}

impl Verifier {
    pub fn new(store: StoreManager, engine: Arc<dyn BackupEngine>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            engine,
            audit,
        }
    }

    /// 校验备份产物的完整性
    pub async fn verify_integrity(&self, execution_id: &str) -> Result<VerificationReport> {
        let now = Utc::now();
        let current = self
            .store
            .current_backup(execution_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("备份执行 {execution_id}")))?;

        // 只有产出了完整或部分产物的备份才有可校验的东西
        if !matches!(
            current.attrs.status,
            ExecutionStatus::Completed | ExecutionStatus::Partial
        ) {
            return Err(VaultError::validation(format!(
                "备份 {execution_id} 状态为 {}，无法校验",
                current.attrs.status.as_str()
            )));
        }

        let location = current.attrs.storage_location.clone().ok_or_else(|| {
            VaultError::validation(format!("备份 {execution_id} 没有产物位置"))
        })?;
        let expected = current.attrs.checksum.clone();

        info!(execution_id = %execution_id, "开始校验备份完整性: {}", location);

        let artifact = Path::new(&location);
        let recomputed = match self.engine.checksum(artifact).await {
            Ok(sum) => Some(sum),
            Err(e) => {
                warn!(execution_id = %execution_id, "复算校验和失败: {}", e);
                None
            }
        };
        let structure_ok = self.engine.validate_structure(artifact).await.unwrap_or(false);

        let checksum_match = match (&expected, &recomputed) {
            (Some(expected), Some(recomputed)) => expected == recomputed,
            _ => false,
        };

        let status = if checksum_match && structure_ok {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        };

        // 纯校验版本：只动校验字段，落库的基准校验和保持不变
        self.store
            .record_verification(execution_id, status, checksum_match && structure_ok, now)
            .await?;

        emit(
            self.audit.as_ref(),
            AuditEvent {
                entity_kind: "backup_execution",
                entity_id: execution_id.to_string(),
                tenant: None,
                from_status: Some(current.attrs.verification_status.as_str().to_string()),
                to_status: status.as_str().to_string(),
                at: now,
                detail: Some(format!(
                    "checksum_match={checksum_match} structure_ok={structure_ok}"
                )),
            },
        )
        .await;

        info!(
            execution_id = %execution_id,
            status = status.as_str(),
            "备份完整性校验完成"
        );

        Ok(VerificationReport {
            execution_id: execution_id.to_string(),
            status,
            checksum_match,
            structure_ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupExecutionManager, FullBackupRequest};
    use crate::config::OrchestratorConfig;
    use crate::engine::mock::MockEngine;
    use crate::events::TracingAuditSink;

    async fn seed_backup(store: &StoreManager, verify: bool) -> String {
        let mgr = BackupExecutionManager::new(
            store.clone(),
            Arc::new(MockEngine::default()),
            Arc::new(TracingAuditSink),
            OrchestratorConfig::default(),
        );
        let mut req = FullBackupRequest::new(Some("t1".into()));
        req.verify = verify;
        mgr.create_full_backup(req).await.unwrap().execution_id
    }

    #[tokio::test]
    async fn test_verify_matching_checksum() {
        let store = StoreManager::new_memory().await.unwrap();
        let id = seed_backup(&store, false).await;

        // 引擎复算出与落库一致的校验和
        let verifier = Verifier::new(
            store.clone(),
            Arc::new(MockEngine::default()),
            Arc::new(TracingAuditSink),
        );
        let report = verifier.verify_integrity(&id).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Verified);
        assert!(report.checksum_match);
        assert!(report.structure_ok);

        // 校验版本只动校验字段，业务状态不变
        let current = store.current_backup(&id).await.unwrap().unwrap();
        assert_eq!(current.attrs.status, ExecutionStatus::Completed);
        assert_eq!(current.attrs.verification_status, VerificationStatus::Verified);
        assert!(current.attrs.integrity_verified);
        assert!(current.attrs.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_verify_mismatched_checksum_fails() {
        let store = StoreManager::new_memory().await.unwrap();
        let id = seed_backup(&store, false).await;

        let tampered = MockEngine {
            checksum: "cafebabe".to_string(),
            ..Default::default()
        };
        let verifier = Verifier::new(store.clone(), Arc::new(tampered), Arc::new(TracingAuditSink));
        let report = verifier.verify_integrity(&id).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Failed);
        assert!(!report.checksum_match);

        let current = store.current_backup(&id).await.unwrap().unwrap();
        assert_eq!(current.attrs.verification_status, VerificationStatus::Failed);
        assert!(!current.attrs.integrity_verified);
    }

    #[tokio::test]
    async fn test_repeat_verify_of_tampered_artifact_stays_failed() {
        let store = StoreManager::new_memory().await.unwrap();
        let id = seed_backup(&store, false).await;

        // 产物被篡改后，多次校验必须始终失败：
        // 落库的基准校验和不能被复算值覆盖
        let tampered = MockEngine {
            checksum: "cafebabe".to_string(),
            ..Default::default()
        };
        let verifier = Verifier::new(store.clone(), Arc::new(tampered), Arc::new(TracingAuditSink));

        let first = verifier.verify_integrity(&id).await.unwrap();
        assert_eq!(first.status, VerificationStatus::Failed);

        let second = verifier.verify_integrity(&id).await.unwrap();
        assert_eq!(second.status, VerificationStatus::Failed);
        assert!(!second.checksum_match);

        // 基准校验和仍是备份完成时记录的值
        let current = store.current_backup(&id).await.unwrap().unwrap();
        assert_eq!(current.attrs.checksum.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn test_verify_broken_structure_fails() {
        let store = StoreManager::new_memory().await.unwrap();
        let id = seed_backup(&store, false).await;

        let broken = MockEngine {
            structure_ok: false,
            ..Default::default()
        };
        let verifier = Verifier::new(store.clone(), Arc::new(broken), Arc::new(TracingAuditSink));
        let report = verifier.verify_integrity(&id).await.unwrap();
        assert_eq!(report.status, VerificationStatus::Failed);
        assert!(report.checksum_match);
        assert!(!report.structure_ok);
    }

    #[tokio::test]
    async fn test_verify_unknown_backup() {
        let store = StoreManager::new_memory().await.unwrap();
        let verifier = Verifier::new(
            store,
            Arc::new(MockEngine::default()),
            Arc::new(TracingAuditSink),
        );
        let err = verifier.verify_integrity("bx-missing").await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_verification_appends_version() {
        let store = StoreManager::new_memory().await.unwrap();
        let id = seed_backup(&store, false).await;

        let verifier = Verifier::new(
            store.clone(),
            Arc::new(MockEngine::default()),
            Arc::new(TracingAuditSink),
        );
        verifier.verify_integrity(&id).await.unwrap();

        // RUNNING -> COMPLETED -> 校验版本
        let history = store.backup_history(&id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[2].valid_to.is_none());
    }
}
