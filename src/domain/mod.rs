//! 领域模型模块
//!
//! 项目、环境、数据传输与归档等纯数据类型

pub mod archive;
pub mod deploy;
pub mod environment;
pub mod transfer;

pub use archive::DataArchive;
pub use deploy::{DeployRequest, LogLine};
pub use environment::{Environment, Project};
pub use transfer::{DataTransfer, Direction, TransferMode};
