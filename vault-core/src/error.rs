use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("记录不存在: {0}")]
    NotFound(String),

    #[error("增量备份不能依赖自身: {0}")]
    SelfDependency(String),

    #[error("租户 {scope} 不存在已完成的全量备份，无法创建增量备份")]
    NoBaseBackup { scope: String },

    #[error("目标时间点 {target} 之前没有可用的已完成备份")]
    NoSuitableBackup { target: String },

    #[error("临时性错误（可重试）: {0}")]
    Transient(String),

    #[error("致命错误（不可重试）: {0}")]
    Fatal(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for VaultError {
    fn from(err: duckdb::Error) -> Self {
        VaultError::DuckDb(err.to_string())
    }
}

impl VaultError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// 是否属于可重试的临时性错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// 终态版本中记录的错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::SelfDependency(_) => "SELF_DEPENDENCY",
            Self::NoBaseBackup { .. } => "NO_BASE_BACKUP",
            Self::NoSuitableBackup { .. } => "NO_SUITABLE_BACKUP",
            Self::Transient(_) => "TRANSIENT",
            Self::Fatal(_) => "FATAL",
            Self::Validation(_) => "VALIDATION",
            _ => "INTERNAL",
        }
    }
}
