//! 服务层模块
//!
//! 包含核心编排逻辑：维护模式、部署、数据传输（备份 / 恢复）与归档

pub mod archive;
pub mod deploy;
pub mod maintenance;
pub mod transfer;

pub use archive::{ArchiveStore, JsonArchiveStore};
pub use deploy::DeployOrchestrator;
pub use maintenance::MaintenanceController;
pub use transfer::{TransferOrchestrator, TransferOutcome};
