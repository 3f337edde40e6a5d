//! 配置模块
//!
//! 环境变量解析与项目清单

pub mod env;
pub mod inventory;

pub use env::{AlertConfig, OrchestratorConfig, PackageConfig};
pub use inventory::Inventory;
