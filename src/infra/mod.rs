//! 基础设施模块
//!
//! 封装外部依赖（命令执行、远端任务执行器、归档工具、告警 webhook）

pub mod alert;
pub mod archive_tool;
pub mod command;
pub mod remote_task;

pub use alert::{AlertSender, OperatorAlert, WebhookAlertClient};
pub use archive_tool::ArchiveTool;
pub use command::{CommandLine, CommandOutcome, CommandRunner, TaskExecutor};
pub use remote_task::{RemoteTask, RemoteTaskBuilder};
