//! 运行时状态模块
//!
//! 管理操作日志、日志中心和环境级互斥

pub mod env_locks;
pub mod log_hub;
pub mod operation_log;

pub use env_locks::{EnvironmentLease, EnvironmentLocks};
pub use log_hub::{LogHub, OperationStatus, OperationSummary};
pub use operation_log::{LogCursor, LogSink, OperationLog};
