// 版本化实体存储模块
//
// 这个模块把"身份 + 只追加版本历史"的时态建模落到DuckDB上，并通过
// Actor模式满足DuckDB的单线程访问要求：所有读写经由消息通道进入
// 唯一持有连接的Actor，append天然串行，保证任一身份同时只有一条
// 开放版本。
//
// 主要组件：
// - StoreManager: 高级API接口，供编排器各组件使用
// - StoreActor: 内部Actor，处理实际的数据库操作
// - 数据模型和消息定义

mod actor;
mod manager;
mod messages;
pub mod models;

pub use manager::StoreManager;
pub use models::{
    BackupScope, BackupType, BackupVersion, BackupVersionAttrs, DueSchedule, EntityRecord,
    ExecutionStatus, ExpiredCandidate, RecoveryStatus, RecoveryType, RecoveryVersion,
    RecoveryVersionAttrs, ScheduleVersion, ScheduleVersionAttrs, VerificationStatus,
};
