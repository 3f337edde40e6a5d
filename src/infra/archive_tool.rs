//! 外部归档工具
//!
//! 打包、校验（可自动修复）与解包都交给外部工具完成，这里只负责拼命令和转换结果

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::env::constants::COMMAND_TIMEOUT_SECS;
use crate::error::StepFailure;
use crate::state::operation_log::LogSink;

use super::command::{CommandLine, TaskExecutor};

/// 工具子命令
pub mod subcommands {
    pub const PACK: &str = "pack";
    pub const VALIDATE: &str = "validate";
    pub const UNPACK: &str = "unpack";
}

/// 归档解包后的固定布局
pub const DB_DUMP_FILE: &str = "db.sql";
pub const ASSETS_DIR: &str = "assets";

#[derive(Clone)]
pub struct ArchiveTool {
    program: String,
    executor: Arc<dyn TaskExecutor>,
    timeout: Duration,
}

impl ArchiveTool {
    pub fn new(program: impl Into<String>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            program: program.into(),
            executor,
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
        }
    }

    /// 把数据库导出和/或资源目录打成一个归档
    ///
    /// 只传入实际存在的部分：仅数据库时只有 `--db`，仅资源时只有 `--assets`
    pub async fn pack(
        &self,
        output: &Path,
        db_dump: Option<&Path>,
        assets_dir: Option<&Path>,
        log: &dyn LogSink,
    ) -> Result<(), StepFailure> {
        let mut line = CommandLine::new(&self.program)
            .arg(subcommands::PACK)
            .arg(format!("--output={}", output.display()));
        if let Some(db) = db_dump {
            line = line.arg(format!("--db={}", db.display()));
        }
        if let Some(assets) = assets_dir {
            line = line.arg(format!("--assets={}", assets.display()));
        }
        self.run(line, log).await
    }

    /// 校验归档，必要时尝试修复
    pub async fn validate(&self, archive: &Path, log: &dyn LogSink) -> Result<(), StepFailure> {
        let line = CommandLine::new(&self.program)
            .arg(subcommands::VALIDATE)
            .arg("--repair")
            .arg(archive.display().to_string());
        self.run(line, log).await
    }

    /// 解包到目标目录
    pub async fn unpack(&self, archive: &Path, dest: &Path, log: &dyn LogSink) -> Result<(), StepFailure> {
        let line = CommandLine::new(&self.program)
            .arg(subcommands::UNPACK)
            .arg(format!("--dest={}", dest.display()))
            .arg(archive.display().to_string());
        self.run(line, log).await
    }

    async fn run(&self, line: CommandLine, log: &dyn LogSink) -> Result<(), StepFailure> {
        log.stdout(&format!(">>> {}", line.render()));
        match self.executor.execute(&line, self.timeout, log).await {
            Ok(outcome) if outcome.success => Ok(()),
            Ok(outcome) => Err(StepFailure::from_outcome(&outcome)),
            Err(e) => Err(StepFailure::from(e)),
        }
    }
}
