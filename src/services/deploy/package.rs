//! 部署包生成
//!
//! 可选协作者：根据构建标识生成部署包，返回空结果视为失败

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::env::constants::COMMAND_TIMEOUT_SECS;
use crate::config::env::PackageConfig;
use crate::infra::command::{CommandLine, TaskExecutor};
use crate::services::archive::sanitize_component;
use crate::state::operation_log::LogSink;

/// 部署包生成接口
#[async_trait]
pub trait PackageGenerator: Send + Sync {
    /// 生成部署包，`Ok(None)` 表示没有产出
    async fn generate(&self, build: &str, log: &dyn LogSink) -> anyhow::Result<Option<PathBuf>>;
}

/// 运行本地构建命令生成部署包
///
/// 命令通过 `BUILD` 环境变量接收清洗后的构建标识，产物应位于 `<output_dir>/$BUILD.tar.gz`
pub struct CommandPackageGenerator {
    config: PackageConfig,
    executor: Arc<dyn TaskExecutor>,
}

impl CommandPackageGenerator {
    pub fn new(config: PackageConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn artifact_path(&self, build: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.tar.gz", sanitize_component(build)))
    }

    fn command_line(&self, build: &str) -> CommandLine {
        CommandLine::new("sh")
            .arg("-c")
            .arg(&self.config.command)
            .env("BUILD", sanitize_component(build))
            .current_dir(&self.config.output_dir)
    }
}

#[async_trait]
impl PackageGenerator for CommandPackageGenerator {
    async fn generate(&self, build: &str, log: &dyn LogSink) -> anyhow::Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let line = self.command_line(build);
        log.stdout(&format!(">>> {}", line.render()));

        let outcome = self
            .executor
            .execute(&line, Duration::from_secs(COMMAND_TIMEOUT_SECS), log)
            .await?;
        if !outcome.success {
            anyhow::bail!("package command failed: {}", outcome.error_output);
        }

        let artifact = self.artifact_path(build);
        match tokio::fs::metadata(&artifact).await {
            Ok(meta) if meta.len() > 0 => Ok(Some(artifact)),
            _ => Ok(None),
        }
    }
}
