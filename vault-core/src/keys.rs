use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// 可派生身份的实体种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Backup,
    Recovery,
    Schedule,
}

impl EntityKind {
    /// 身份前缀，方便在日志里一眼区分实体种类
    fn prefix(&self) -> &'static str {
        match self {
            Self::Backup => "bx",
            Self::Recovery => "rc",
            Self::Schedule => "sc",
        }
    }
}

/// 从操作的定义性属性派生确定性ID
///
/// 纯函数：相同输入必得相同ID。配合身份表的"插入或忽略"写入，
/// 重复的"发起备份"请求不会产生重复身份。需要跨重试区分时
/// 由调用方传入随机salt。
pub fn derive_id(
    kind: EntityKind,
    scope: Option<&str>,
    timestamp: DateTime<Utc>,
    salt: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.prefix().as_bytes());
    hasher.update(b"|");
    hasher.update(scope.unwrap_or("__system__").as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.timestamp_micros().to_be_bytes());
    if let Some(salt) = salt {
        hasher.update(b"|");
        hasher.update(salt.as_bytes());
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{}-{}", kind.prefix(), hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_same_inputs_same_id() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = derive_id(EntityKind::Backup, Some("t1"), ts, None);
        let b = derive_id(EntityKind::Backup, Some("t1"), ts, None);
        assert_eq!(a, b);
        assert!(a.starts_with("bx-"));
    }

    #[test]
    fn test_different_scope_different_id() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = derive_id(EntityKind::Backup, Some("t1"), ts, None);
        let b = derive_id(EntityKind::Backup, Some("t2"), ts, None);
        let system = derive_id(EntityKind::Backup, None, ts, None);
        assert_ne!(a, b);
        assert_ne!(a, system);
    }

    #[test]
    fn test_salt_separates_retries() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = derive_id(EntityKind::Recovery, Some("t1"), ts, Some("salt-a"));
        let b = derive_id(EntityKind::Recovery, Some("t1"), ts, Some("salt-b"));
        assert_ne!(a, b);
        assert!(a.starts_with("rc-"));
    }

    #[test]
    fn test_kind_changes_id() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = derive_id(EntityKind::Backup, Some("t1"), ts, None);
        let b = derive_id(EntityKind::Schedule, Some("t1"), ts, None);
        assert_ne!(a[3..], b[3..]);
    }
}
