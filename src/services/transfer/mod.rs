//! 数据传输编排
//!
//! 按方向分派：pull 从环境导出数据并打包成归档（备份），
//! push 把归档应用到目标环境（恢复）

mod backup;
mod restore;
pub mod workdir;

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::env::OrchestratorConfig;
use crate::domain::archive::DataArchive;
use crate::domain::environment::Environment;
use crate::domain::transfer::{DataTransfer, Direction, TransferMode};
use crate::error::OrchestratorError;
use crate::infra::archive_tool::ArchiveTool;
use crate::infra::command::TaskExecutor;
use crate::infra::remote_task::{actions, roles, RemoteTaskBuilder};
use crate::services::archive::{generate_upload_token, ArchiveStore};
use crate::services::maintenance::MaintenanceController;
use crate::state::env_locks::EnvironmentLocks;
use crate::state::operation_log::LogSink;

pub use workdir::WorkDir;

/// 传输结果
#[derive(Debug)]
pub enum TransferOutcome {
    /// 备份完成，归档已登记
    BackedUp(DataArchive),
    /// 恢复完成，归档已关联本次传输
    Restored(DataArchive),
}

/// 数据传输编排器
pub struct TransferOrchestrator {
    executor: Arc<dyn TaskExecutor>,
    builder: RemoteTaskBuilder,
    maintenance: MaintenanceController,
    archive_tool: ArchiveTool,
    store: Arc<dyn ArchiveStore>,
    locks: Arc<EnvironmentLocks>,
    transfer_root: PathBuf,
    archive_root: PathBuf,
    cancel_token: CancellationToken,
}

impl TransferOrchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        executor: Arc<dyn TaskExecutor>,
        builder: RemoteTaskBuilder,
        store: Arc<dyn ArchiveStore>,
        locks: Arc<EnvironmentLocks>,
    ) -> Self {
        Self {
            maintenance: MaintenanceController::new(executor.clone(), builder.clone()),
            archive_tool: ArchiveTool::new(&config.archive_tool, executor.clone()),
            executor,
            builder,
            store,
            locks,
            transfer_root: config.transfer_root.clone(),
            archive_root: config.archive_root.clone(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// 取消只在步骤之间生效
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 按传输方向执行
    ///
    /// push 必须提供归档；pull 忽略传入的归档
    pub async fn run(
        &self,
        transfer: &DataTransfer,
        archive: Option<DataArchive>,
        log: &dyn LogSink,
    ) -> Result<TransferOutcome, OrchestratorError> {
        info!(
            transfer = %transfer.id,
            direction = transfer.direction.as_str(),
            mode = %transfer.mode,
            environment = %transfer.environment.key(),
            "Starting data transfer"
        );
        match transfer.direction {
            Direction::Pull => self.backup(transfer, log).await.map(TransferOutcome::BackedUp),
            Direction::Push => {
                let archive = archive.ok_or_else(|| {
                    OrchestratorError::InvalidArchive("no archive supplied for restore".to_string())
                })?;
                self.restore(transfer, archive, log)
                    .await
                    .map(TransferOutcome::Restored)
            }
        }
    }

    /// 单独执行 rebuild（deploy:migrate）
    pub async fn rebuild(&self, environment: &Environment, log: &dyn LogSink) -> Result<(), OrchestratorError> {
        let _lease = self.locks.try_acquire(&environment.key())?;
        self.run_rebuild(environment, log).await
    }

    pub(crate) async fn run_rebuild(&self, environment: &Environment, log: &dyn LogSink) -> Result<(), OrchestratorError> {
        log.stdout(&format!("Rebuilding {}", environment));
        let task = self
            .builder
            .build(actions::DEPLOY_MIGRATE, roles::WEB, environment, Vec::new(), log);
        match task.run(self.executor.as_ref(), log).await {
            Ok(()) => {
                log.stdout(&format!("Rebuild finished on {}", environment));
                Ok(())
            }
            Err(failure) => {
                log.stderr(&format!("Rebuild failed on {}: {}", environment, failure));
                Err(OrchestratorError::Rebuild(failure))
            }
        }
    }

    /// 创建等待人工上传的归档，返回带令牌的记录
    pub async fn create_pending_archive(
        &self,
        mode: TransferMode,
        author: &str,
        environment: &Environment,
    ) -> Result<DataArchive, OrchestratorError> {
        let archive = DataArchive::pending(mode, author, environment, generate_upload_token());
        let path = self.store.save(&archive).await?;
        info!(archive = %archive.id, record = %path.display(), "Created pending archive");
        Ok(archive)
    }

    pub fn store(&self) -> &Arc<dyn ArchiveStore> {
        &self.store
    }

    pub fn archive_root(&self) -> &std::path::Path {
        &self.archive_root
    }

    fn check_cancelled(&self, before: &'static str, log: &dyn LogSink) -> Result<(), OrchestratorError> {
        if self.cancel_token.is_cancelled() {
            log.stderr(&format!("=== Transfer CANCELLED before {} ===", before));
            return Err(OrchestratorError::Cancelled(before));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::orchestrator;
    use super::*;
    use crate::services::archive::JsonArchiveStore;
    use crate::state::operation_log::OperationLog;
    use crate::test_support::{prod_environment, FakeExecutor};

    #[tokio::test]
    async fn test_push_without_archive_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new());
        let transfer = DataTransfer::new(Direction::Push, TransferMode::Db, prod_environment(), "alice");
        let log = OperationLog::new();

        let err = orchestrator(root.path(), executor.clone())
            .run(&transfer, None, &log)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::InvalidArchive(_)));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_failure_carries_output() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new().fail_with(actions::DEPLOY_MIGRATE, "migration 42 failed"));
        let log = OperationLog::new();

        let err = orchestrator(root.path(), executor)
            .rebuild(&prod_environment(), &log)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Rebuild(_)));
        assert_eq!(err.captured_output().as_deref(), Some("migration 42 failed"));
    }

    #[tokio::test]
    async fn test_create_pending_archive_persists_token() {
        let root = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(root.path(), Arc::new(FakeExecutor::new()));

        let archive = orchestrator
            .create_pending_archive(TransferMode::Assets, "bob", &prod_environment())
            .await
            .unwrap();

        assert!(archive.is_pending());
        let token = archive.upload_token.clone().unwrap();
        assert_eq!(token.len(), 8);

        let record = root.path().join("archives").join(format!("{}.json", archive.id));
        let loaded = JsonArchiveStore::load(&record).await.unwrap();
        assert_eq!(loaded.upload_token, Some(token));
    }
}
