//! 备份（pull）

use chrono::Utc;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::domain::archive::DataArchive;
use crate::domain::transfer::DataTransfer;
use crate::error::{OrchestratorError, StepFailure};
use crate::infra::archive_tool::{ASSETS_DIR, DB_DUMP_FILE};
use crate::infra::remote_task::{actions, roles};
use crate::services::archive::{archive_file_name, content_hash, random_suffix, transfer_workdir_path};
use crate::state::operation_log::LogSink;

use super::{TransferOrchestrator, WorkDir};

impl TransferOrchestrator {
    /// 从环境导出数据并打包
    ///
    /// 导出失败不会尝试打包；工作目录在任何路径上都会删除，
    /// 成功后删除失败报告为 `Cleanup`，但归档已经登记保存
    pub async fn backup(&self, transfer: &DataTransfer, log: &dyn LogSink) -> Result<DataArchive, OrchestratorError> {
        let environment = &transfer.environment;
        let _lease = self.locks.try_acquire(&environment.key())?;

        log.stdout(&format!(
            "Backing up {} data from {}",
            transfer.mode, environment
        ));

        let mut archive = DataArchive::backup_placeholder(transfer.mode, &transfer.author, environment);

        let mut workdir = WorkDir::create(transfer_workdir_path(
            &self.transfer_root,
            &environment.project.name,
            &environment.name,
            &transfer.id,
        ))
        .await?;

        let result = self.backup_steps(transfer, &workdir, &mut archive, log).await;

        let removal = workdir.remove().await;
        match (&result, removal) {
            (_, Ok(())) => log.stdout("Removed working directory"),
            (Ok(()), Err(e)) => {
                log.stderr(&format!("Failed to remove working directory: {}", e));
                error!(transfer = %transfer.id, error = %e, "Backup working directory not removed");
                return Err(OrchestratorError::Cleanup(format!(
                    "{}: {}",
                    workdir.path().display(),
                    e
                )));
            }
            (Err(_), Err(e)) => {
                log.stderr(&format!("Failed to remove working directory: {}", e));
                warn!(transfer = %transfer.id, error = %e, "Backup working directory not removed after failure");
            }
        }

        match result {
            Ok(()) => {
                log.stdout(&format!("=== Backup of {} finished ===", environment));
                Ok(archive)
            }
            Err(e) => {
                log.stderr(&format!("=== Backup of {} FAILED ===", environment));
                Err(e)
            }
        }
    }

    async fn backup_steps(
        &self,
        transfer: &DataTransfer,
        workdir: &WorkDir,
        archive: &mut DataArchive,
        log: &dyn LogSink,
    ) -> Result<(), OrchestratorError> {
        let environment = &transfer.environment;
        let db_dump = transfer.mode.includes_db().then(|| workdir.join(DB_DUMP_FILE));
        let assets_dir = transfer.mode.includes_assets().then(|| workdir.join(ASSETS_DIR));

        if let Some(ref dump) = db_dump {
            self.check_cancelled(actions::DATA_GET_DB, log)?;
            log.stdout("Dumping database");
            let task = self.builder.build(
                actions::DATA_GET_DB,
                roles::DB,
                environment,
                vec![("dump".to_string(), dump.display().to_string())],
                log,
            );
            task.run(self.executor.as_ref(), log)
                .await
                .map_err(|failure| backup_failed(actions::DATA_GET_DB, failure, log))?;
        }

        if let Some(ref assets) = assets_dir {
            self.check_cancelled(actions::DATA_GET_ASSETS, log)?;
            log.stdout("Downloading assets");
            let task = self.builder.build(
                actions::DATA_GET_ASSETS,
                roles::WEB,
                environment,
                vec![("assets".to_string(), assets.display().to_string())],
                log,
            );
            task.run(self.executor.as_ref(), log)
                .await
                .map_err(|failure| backup_failed(actions::DATA_GET_ASSETS, failure, log))?;
        }

        self.check_cancelled("packaging", log)?;
        tokio::fs::create_dir_all(&self.archive_root).await?;
        let output: PathBuf = self.archive_root.join(archive_file_name(
            &environment.project.name,
            &environment.name,
            transfer.mode,
            Utc::now().date_naive(),
            &random_suffix(),
        ));

        log.stdout(&format!("Packaging archive {}", output.display()));
        if let Err(failure) = self
            .archive_tool
            .pack(&output, db_dump.as_deref(), assets_dir.as_deref(), log)
            .await
        {
            log.stderr(&format!("Packaging failed: {}", failure));
            // 不保留半成品
            let _ = tokio::fs::remove_file(&output).await;
            return Err(OrchestratorError::Packaging(failure));
        }

        let hash = content_hash(&output).await.map_err(|e| {
            OrchestratorError::Packaging(StepFailure::Invocation {
                message: format!("packaged archive unreadable: {}", e),
            })
        })?;

        archive.register_file(output.clone(), hash);
        archive.associate_transfer(&transfer.id);
        let record = self.store.save(archive).await?;

        log.stdout(&format!("Archive registered: {}", output.display()));
        info!(
            transfer = %transfer.id,
            archive = %archive.id,
            record = %record.display(),
            "Backup archive registered"
        );
        Ok(())
    }
}

fn backup_failed(step: &'static str, failure: StepFailure, log: &dyn LogSink) -> OrchestratorError {
    log.stderr(&format!("{} failed: {}", step, failure));
    OrchestratorError::Backup { step, failure }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::orchestrator;
    use crate::domain::transfer::{DataTransfer, Direction, TransferMode};
    use crate::error::OrchestratorError;
    use crate::infra::archive_tool::subcommands;
    use crate::infra::remote_task::actions;
    use crate::services::archive::JsonArchiveStore;
    use crate::state::operation_log::OperationLog;
    use crate::test_support::{flag_value, option_value, prod_environment, FakeExecutor};
    use std::path::Path;
    use std::sync::Arc;

    /// 导出和打包命令真正写出文件的假执行器
    fn producing_executor() -> FakeExecutor {
        FakeExecutor::new()
            .with_effect(actions::DATA_GET_DB, |cmd| {
                let dump = option_value(cmd, "dump").unwrap();
                std::fs::write(dump, b"-- sql dump").unwrap();
            })
            .with_effect(actions::DATA_GET_ASSETS, |cmd| {
                let assets = option_value(cmd, "assets").unwrap();
                std::fs::create_dir_all(Path::new(&assets).join("img")).unwrap();
            })
            .with_effect(subcommands::PACK, |cmd| {
                let output = flag_value(cmd, "--output").unwrap();
                std::fs::write(output, b"packed").unwrap();
            })
    }

    fn transfer(mode: TransferMode) -> DataTransfer {
        DataTransfer::new(Direction::Pull, mode, prod_environment(), "alice").with_id("t1")
    }

    #[tokio::test]
    async fn test_db_backup_dumps_and_packs_db_only() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(producing_executor());
        let log = OperationLog::new();

        let archive = orchestrator(root.path(), executor.clone())
            .backup(&transfer(TransferMode::Db), &log)
            .await
            .unwrap();

        assert_eq!(executor.actions(), vec![actions::DATA_GET_DB, subcommands::PACK]);
        let pack = executor.rendered(subcommands::PACK).unwrap();
        assert!(pack.contains("--db="));
        assert!(!pack.contains("--assets="));
        assert!(executor.rendered(actions::DATA_GET_DB).unwrap().contains("data:getdb db"));

        assert_eq!(archive.mode, TransferMode::Db);
        assert!(archive.is_backup);
        assert_eq!(archive.transfer_ids, vec!["t1"]);
        let file = archive.file.clone().unwrap();
        assert!(file.exists());
        assert!(file.file_name().unwrap().to_string_lossy().starts_with("shop-prod-db-"));
        assert_eq!(archive.content_hash.as_deref().map(str::len), Some(64));

        let record = JsonArchiveStore::new(root.path()).metadata_path(&archive);
        assert_eq!(JsonArchiveStore::load(&record).await.unwrap(), archive);

        assert!(!root.path().join("transfers/shop/prod/transfer-t1").exists());
    }

    #[tokio::test]
    async fn test_assets_backup_packs_assets_only() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(producing_executor());
        let log = OperationLog::new();

        orchestrator(root.path(), executor.clone())
            .backup(&transfer(TransferMode::Assets), &log)
            .await
            .unwrap();

        assert_eq!(executor.actions(), vec![actions::DATA_GET_ASSETS, subcommands::PACK]);
        let pack = executor.rendered(subcommands::PACK).unwrap();
        assert!(pack.contains("--assets="));
        assert!(!pack.contains("--db="));
        assert!(executor.rendered(actions::DATA_GET_ASSETS).unwrap().contains("data:getassets web"));
    }

    #[tokio::test]
    async fn test_full_backup_uses_both() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(producing_executor());
        let log = OperationLog::new();

        orchestrator(root.path(), executor.clone())
            .backup(&transfer(TransferMode::All), &log)
            .await
            .unwrap();

        assert_eq!(
            executor.actions(),
            vec![actions::DATA_GET_DB, actions::DATA_GET_ASSETS, subcommands::PACK]
        );
        let pack = executor.rendered(subcommands::PACK).unwrap();
        assert!(pack.contains("--db="));
        assert!(pack.contains("--assets="));
    }

    #[tokio::test]
    async fn test_dump_failure_skips_packaging_and_removes_workdir() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(producing_executor().fail_with(actions::DATA_GET_DB, "mysqldump: access denied"));
        let log = OperationLog::new();

        let err = orchestrator(root.path(), executor.clone())
            .backup(&transfer(TransferMode::All), &log)
            .await
            .unwrap_err();

        match err {
            OrchestratorError::Backup { step, ref failure } => {
                assert_eq!(step, actions::DATA_GET_DB);
                assert_eq!(failure.output(), "mysqldump: access denied");
            }
            ref other => panic!("unexpected error: {other}"),
        }
        assert_eq!(executor.count(subcommands::PACK), 0);
        assert_eq!(executor.count(actions::DATA_GET_ASSETS), 0);
        assert!(!root.path().join("transfers/shop/prod/transfer-t1").exists());
    }

    #[tokio::test]
    async fn test_packaging_failure() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(producing_executor().fail_with(subcommands::PACK, "disk full"));
        let log = OperationLog::new();

        let err = orchestrator(root.path(), executor)
            .backup(&transfer(TransferMode::Db), &log)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Packaging(_)));
        assert_eq!(err.captured_output().as_deref(), Some("disk full"));
        assert!(!root.path().join("transfers/shop/prod/transfer-t1").exists());
    }
}
