//! XJP Orchestrator - 部署与数据迁移编排
//!
//! 包装外部远端任务执行器，按顺序执行部署、备份与恢复，
//! 管理维护模式窗口并保证失败后的清理

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_support;

pub use error::{OrchestratorError, OrchestratorResult};
