//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use tracing::warn;

/// 编排器配置
///
/// 启动时加载一次，显式传给各个编排器
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// 远端任务执行器程序
    pub task_runner: String,
    /// 传给执行器的 recipe 文件
    pub recipe_file: Option<PathBuf>,
    /// 本地操作历史目录
    pub history_dir: PathBuf,
    /// 数据传输工作目录根
    pub transfer_root: PathBuf,
    /// 归档存放目录
    pub archive_root: PathBuf,
    /// 归档打包 / 校验工具
    pub archive_tool: String,
    /// 部署包构建
    pub package: Option<PackageConfig>,
    /// 运维告警
    pub alert: AlertConfig,
}

/// 部署包构建配置
#[derive(Clone, Debug)]
pub struct PackageConfig {
    /// 本地构建命令（通过 `BUILD` 环境变量接收构建标识）
    pub command: String,
    /// 构建产物目录
    pub output_dir: PathBuf,
}

/// 运维告警配置
#[derive(Clone, Debug, Default)]
pub struct AlertConfig {
    /// 告警接收地址
    pub recipient: Option<String>,
    /// 告警投递 webhook
    pub webhook_url: Option<String>,
}

impl AlertConfig {
    pub fn is_configured(&self) -> bool {
        self.recipient.is_some()
    }
}

impl OrchestratorConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let data_dir = env::var("XJP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(constants::DEFAULT_DATA_DIR));

        let task_runner = env::var("XJP_TASK_RUNNER").unwrap_or_else(|_| "dep".to_string());
        let recipe_file = env::var("XJP_RECIPE_FILE").ok().map(PathBuf::from);

        let history_dir = path_or("XJP_HISTORY_DIR", data_dir.join("history"));
        let transfer_root = path_or("XJP_TRANSFER_ROOT", data_dir.join("transfers"));
        let archive_root = path_or("XJP_ARCHIVE_ROOT", data_dir.join("archives"));

        let archive_tool = env::var("XJP_ARCHIVE_TOOL").unwrap_or_else(|_| "xjp-archive".to_string());

        let package = env::var("XJP_PACKAGE_COMMAND")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|command| PackageConfig {
                command,
                output_dir: path_or("XJP_PACKAGE_DIR", data_dir.join("packages")),
            });

        // 告警地址 - 支持旧名称兼容
        let recipient = load_with_fallback("XJP_ALERT_RECIPIENT", "ADMIN_EMAIL").filter(|s| !s.is_empty());
        if env::var("XJP_ALERT_RECIPIENT").is_err() && env::var("ADMIN_EMAIL").is_ok() {
            warn!("Deprecated environment variable ADMIN_EMAIL detected. Please use XJP_ALERT_RECIPIENT");
        }
        let webhook_url = env::var("XJP_ALERT_WEBHOOK_URL").ok().filter(|s| !s.is_empty());

        Self {
            task_runner,
            recipe_file,
            history_dir,
            transfer_root,
            archive_root,
            archive_tool,
            package,
            alert: AlertConfig {
                recipient,
                webhook_url,
            },
        }
    }
}

fn path_or(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 远端命令超时（秒）
    pub const COMMAND_TIMEOUT_SECS: u64 = 3600; // 1 小时

    /// 命令退出后继续读取输出管道的宽限时间（秒）
    pub const PIPE_DRAIN_GRACE_SECS: u64 = 2;

    /// 告警中保留的日志尾部字符数
    pub const ALERT_LOG_TAIL_CHARS: usize = 3000;

    /// 日志截断标记
    pub const TRUNCATION_MARKER: &str = "[... log truncated ...]";

    /// 上传令牌长度
    pub const UPLOAD_TOKEN_LEN: usize = 8;

    /// 日志广播通道容量
    pub const LOG_CHANNEL_CAPACITY: usize = 256;

    /// 默认数据目录
    pub const DEFAULT_DATA_DIR: &str = "/var/lib/xjp-orchestrator";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
