use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 备份相关命令
#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// 立即创建一次全量备份
    Full {
        /// 租户标识（不指定则为系统级备份）
        #[arg(long)]
        tenant: Option<String>,
        /// 不压缩备份产物
        #[arg(long)]
        no_compress: bool,
        /// 跳过完成后的完整性校验
        #[arg(long)]
        no_verify: bool,
        /// 保留天数（不指定则使用配置默认值）
        #[arg(long)]
        retention_days: Option<i64>,
    },
    /// 基于最近的全量备份创建增量备份
    Incremental {
        /// 租户标识
        #[arg(long)]
        tenant: Option<String>,
        /// 指定基础备份ID（默认自动解析为最近的已完成全量备份）
        #[arg(long)]
        base: Option<String>,
    },
    /// 列出备份及其当前状态
    List {
        /// 只看指定租户
        #[arg(long)]
        tenant: Option<String>,
    },
    /// 显示单个备份的完整版本历史
    History {
        /// 备份执行ID
        execution_id: String,
    },
}

/// 恢复相关命令
#[derive(Subcommand, Debug)]
pub enum RecoveryCommand {
    /// 发起时间点恢复
    Initiate {
        /// 目标时间点（RFC3339格式，例如 2026-08-29T02:00:00Z）
        #[arg(long)]
        target: String,
        /// 租户标识
        #[arg(long)]
        tenant: Option<String>,
        /// 恢复目标的描述（库名、目录等）
        #[arg(long, default_value = "default")]
        into: String,
        /// 需要人工审批后才能执行
        #[arg(long)]
        require_approval: bool,
    },
    /// 审批待执行的恢复操作
    Approve {
        /// 恢复操作ID
        recovery_id: String,
        /// 审批人
        #[arg(long)]
        approver: String,
    },
    /// 执行已审批的恢复
    Execute {
        /// 恢复操作ID
        recovery_id: String,
        /// 恢复到的目标目录（默认在数据根目录下生成）
        #[arg(long)]
        target_dir: Option<PathBuf>,
    },
}

/// 调度相关命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 创建备份调度
    Create {
        /// 调度名称（全局唯一）
        #[arg(long)]
        name: String,
        /// 备份类型：full / incremental / differential
        #[arg(long, default_value = "full")]
        backup_type: String,
        /// 节奏表达式：every:<n><s|m|h|d> 或 daily:HH:MM
        #[arg(long)]
        cadence: String,
        /// 租户标识
        #[arg(long)]
        tenant: Option<String>,
        /// 保留天数
        #[arg(long)]
        retention_days: Option<i64>,
        /// 成功时发送通知
        #[arg(long)]
        notify_on_success: bool,
    },
    /// 列出所有调度
    List,
    /// 查看前瞻窗口内到期的调度
    Due {
        /// 前瞻窗口（秒）
        #[arg(long)]
        lookahead_secs: Option<u64>,
    },
    /// 启用或停用调度
    SetActive {
        /// 调度ID
        schedule_id: String,
        /// true 启用，false 停用
        active: bool,
    },
}

/// Vault CLI - 多租户备份与恢复编排工具
#[derive(Parser)]
#[command(name = "vault-cli")]
#[command(about = "多租户备份与恢复编排工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 首次使用时初始化：创建配置文件与元数据库
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 备份管理
    #[command(subcommand)]
    Backup(BackupCommand),
    /// 恢复管理
    #[command(subcommand)]
    Recovery(RecoveryCommand),
    /// 调度管理
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 扫描并过期超出保留期的备份
    Sweep {
        /// 只看指定租户
        #[arg(long)]
        tenant: Option<String>,
        /// 演练模式：只报告、不变更状态
        #[arg(long)]
        dry_run: bool,
    },
    /// 校验备份产物的完整性
    Verify {
        /// 备份执行ID
        execution_id: String,
    },
    /// 前台运行调度驱动器，Ctrl+C退出
    Serve,
}
