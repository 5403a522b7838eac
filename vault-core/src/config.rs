use crate::constants::{backup, scheduler, worker};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 编排器配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrchestratorConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
}

/// 元数据库相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// DuckDB元数据库文件路径
    pub db_path: String,
}

/// 备份存储相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// 待备份的数据根目录
    pub data_root: String,
    /// 备份产物存放目录
    pub storage_root: String,
    /// 默认保留天数
    pub default_retention_days: i64,
    /// 默认存储级别
    pub storage_class: String,
}

/// 重试策略配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    /// 临时性错误的最大重试次数
    pub max_retries: u32,
    /// 退避基准毫秒数，按指数递增
    pub backoff_base_ms: u64,
    /// 单次引擎调用的硬超时（秒）
    pub max_execution_secs: u64,
}

/// 调度驱动器配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 前瞻窗口（秒）
    pub lookahead_secs: u64,
    /// 单次轮询派发上限
    pub due_limit: u32,
    /// 工作池并发数
    pub worker_pool_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                db_path: "data/vault.db".to_string(),
            },
            storage: StorageConfig {
                data_root: "data/live".to_string(),
                storage_root: "data/backups".to_string(),
                default_retention_days: backup::DEFAULT_RETENTION_DAYS,
                storage_class: backup::DEFAULT_STORAGE_CLASS.to_string(),
            },
            retry: RetryConfig {
                max_retries: backup::DEFAULT_MAX_RETRIES,
                backoff_base_ms: backup::RETRY_BACKOFF_BASE_MS,
                max_execution_secs: backup::DEFAULT_MAX_EXECUTION_SECS,
            },
            scheduler: SchedulerConfig {
                poll_interval_secs: scheduler::DEFAULT_POLL_INTERVAL_SECS,
                lookahead_secs: scheduler::DEFAULT_LOOKAHEAD_SECS,
                due_limit: scheduler::DEFAULT_DUE_LIMIT,
                worker_pool_size: worker::DEFAULT_POOL_SIZE,
            },
        }
    }
}

impl OrchestratorConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> vault.toml -> .vault.toml
    pub fn find_and_load_config() -> Result<Self> {
        let config_files = ["config.toml", "vault.toml", ".vault.toml"];

        for config_file in &config_files {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        // 如果没找到配置文件，使用默认配置
        tracing::warn!("未找到配置文件，使用默认配置");
        Ok(Self::default())
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: OrchestratorConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 获取备份产物目录路径
    pub fn get_storage_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.storage_root)
    }

    /// 获取数据根目录路径
    pub fn get_data_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_root)
    }

    /// 确保存储目录存在
    pub fn ensure_storage_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.storage.storage_root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.storage.default_retention_days >= 365);
    }

    #[test]
    fn test_load_from_toml() {
        let toml_str = r#"
            [database]
            db_path = "/tmp/vault.db"

            [storage]
            data_root = "/srv/data"
            storage_root = "/srv/backups"
            default_retention_days = 30
            storage_class = "archive"

            [retry]
            max_retries = 5
            backoff_base_ms = 100
            max_execution_secs = 600

            [scheduler]
            poll_interval_secs = 30
            lookahead_secs = 1800
            due_limit = 10
            worker_pool_size = 2
        "#;

        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.storage.storage_class, "archive");
        assert_eq!(config.scheduler.worker_pool_size, 2);
    }
}
