/// 备份执行相关常量
pub mod backup {
    /// 默认保留天数（合规要求：7年）
    pub const DEFAULT_RETENTION_DAYS: i64 = 7 * 365;

    /// 默认保留策略名称
    pub const DEFAULT_RETENTION_POLICY: &str = "compliance-7y";

    /// 引擎调用的默认最大重试次数
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// 重试退避基准（毫秒），按指数递增
    pub const RETRY_BACKOFF_BASE_MS: u64 = 200;

    /// 单次引擎调用的默认硬超时（秒）
    pub const DEFAULT_MAX_EXECUTION_SECS: u64 = 4 * 3600;

    /// 校验和算法标识
    pub const CHECKSUM_ALGORITHM: &str = "sha256";

    /// 默认存储级别
    pub const DEFAULT_STORAGE_CLASS: &str = "standard";
}

/// 恢复操作相关常量
pub mod recovery {
    /// 恢复耗时的固定规划估算（秒），不是实测值
    pub const ESTIMATED_DURATION_SECS: i64 = 30 * 60;
}

/// 调度器相关常量
pub mod scheduler {
    /// 默认调度查询的前瞻窗口（秒）
    pub const DEFAULT_LOOKAHEAD_SECS: u64 = 3600;

    /// 一次调度查询返回的默认上限
    pub const DEFAULT_DUE_LIMIT: u32 = 50;

    /// 驱动器轮询间隔（秒）
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

    /// 默认时区标识
    pub const DEFAULT_TIMEZONE: &str = "UTC";
}

/// 工作池相关常量
pub mod worker {
    /// 默认并发执行的工作者数量
    pub const DEFAULT_POOL_SIZE: usize = 4;
}

/// 存储Actor相关常量
pub mod store {
    /// Actor消息通道容量
    pub const CHANNEL_CAPACITY: usize = 100;
}
